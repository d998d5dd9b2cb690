use anyhow::{bail, Result};
use burn::{
    nn::loss::{CrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
    tensor::activation::log_softmax,
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::BatchTargets;

/// Training loss of the teacher networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    /// Mean squared error against dense targets.
    Mse,
    /// Cross-entropy against class indices or target distributions.
    CrossEntropy,
}

impl Criterion {
    /// Whether this criterion needs dense (one row per example) targets.
    pub fn needs_dense_targets(&self) -> bool {
        matches!(self, Criterion::Mse)
    }

    /// Mean loss of `outputs` [batch, k] against `targets`.
    pub fn loss<B: Backend>(&self, outputs: Tensor<B, 2>, targets: &BatchTargets<B>) -> Result<Tensor<B, 1>> {
        match (self, targets) {
            (Criterion::CrossEntropy, BatchTargets::Classes(classes)) => {
                let ce = CrossEntropyLossConfig::new().init(&outputs.device());
                Ok(ce.forward(outputs, classes.clone()))
            }
            (Criterion::CrossEntropy, BatchTargets::Dense(probs)) => {
                // soft-target cross-entropy: -Σ p · log softmax(z)
                Ok((log_softmax(outputs, 1) * probs.clone()).sum_dim(1).mean().neg())
            }
            (Criterion::Mse, BatchTargets::Dense(values)) => {
                Ok(MseLoss::new().forward(outputs, values.clone(), Reduction::Mean))
            }
            (Criterion::Mse, BatchTargets::Classes(_)) => {
                bail!("MSE needs dense targets; convert class labels to one-hot first")
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    fn scalar(t: Tensor<NdArray, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_mse() {
        let device = Default::default();
        let out = Tensor::<NdArray, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);
        let tgt = Tensor::<NdArray, 2>::from_floats([[1.0, 0.0], [3.0, 6.0]], &device);
        let loss = Criterion::Mse.loss(out, &BatchTargets::Dense(tgt)).unwrap();
        // (0 + 4 + 0 + 4) / 4
        assert!((scalar(loss) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_soft_ce_matches_hard_ce_for_one_hot() {
        let device = Default::default();
        let out = Tensor::<NdArray, 2>::from_floats([[2.0, 0.5, -1.0], [0.1, 0.2, 0.3]], &device);
        let hard = Tensor::<NdArray, 1, Int>::from_ints([0, 2], &device);
        let soft = Tensor::<NdArray, 2>::from_floats([[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]], &device);

        let a = Criterion::CrossEntropy.loss(out.clone(), &BatchTargets::Classes(hard)).unwrap();
        let b = Criterion::CrossEntropy.loss(out, &BatchTargets::Dense(soft)).unwrap();
        assert!((scalar(a) - scalar(b)).abs() < 1e-5);
    }

    #[test]
    fn test_mse_rejects_class_targets() {
        let device = Default::default();
        let out = Tensor::<NdArray, 2>::zeros([1, 2], &device);
        let hard = Tensor::<NdArray, 1, Int>::from_ints([1], &device);
        assert!(Criterion::Mse.loss(out, &BatchTargets::Classes(hard)).is_err());
    }
}
