// ============================================================
// Layer 5 — Linear Probe
// ============================================================
// Measures representation quality of a frozen backbone:
//
//   1. extract_features  — one no-grad pass over the train loader,
//                          features [n, d] and labels [n] in memory
//   2. train_classifier  — fresh linear layer fit by full-batch
//                          L-BFGS on  CE(xW + b, y) + λ·ΣW²
//   3. test_classifier   — batch-by-batch top-1 accuracy, mean
//                          loss and per-example correctness
//
// top_k_accuracy is a standalone helper for reporting.

use anyhow::{bail, Context, Result};
use burn::{
    nn::loss::CrossEntropyLossConfig,
    prelude::*,
    tensor::{backend::AutodiffBackend, TensorData},
};
use indicatif::{ProgressBar, ProgressStyle};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::data::batcher::BatchTargets;
use crate::domain::traits::FeatureExtractor;
use crate::ml::lbfgs::{Lbfgs, LbfgsConfig};
use crate::ml::trainer::Loader;

/// `weight`: [d, c], `bias`: [c]
#[derive(Debug, Clone)]
pub struct LinearClassifier<B: Backend> {
    pub weight: Tensor<B, 2>,
    pub bias:   Tensor<B, 1>,
}

impl<B: Backend> LinearClassifier<B> {
    /// Rebuild from a flat parameter vector laid out as `weight ++ bias`.
    pub fn from_flat(params: &[f32], dim: usize, classes: usize, device: &B::Device) -> Result<Self> {
        if params.len() != dim * classes + classes {
            bail!("expected {} classifier parameters, got {}", dim * classes + classes, params.len());
        }
        let (w, b) = params.split_at(dim * classes);
        Ok(Self {
            weight: Tensor::from_data(TensorData::new(w.to_vec(), [dim, classes]), device),
            bias:   Tensor::from_data(TensorData::new(b.to_vec(), [classes]), device),
        })
    }

    /// features: [n, d] → logits: [n, c]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        features.matmul(self.weight.clone()) + self.bias.clone().unsqueeze_dim(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// λ in CE + λ·ΣW²
    pub reg_weight: f64,
    /// Number of L-BFGS `step` calls.
    pub iterations: usize,
    pub seed:       u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { reg_weight: 1e-3, iterations: 500, seed: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearEvalReport {
    /// Top-1 accuracy in percent.
    pub accuracy:  f64,
    /// Mean of the per-batch test losses.
    pub mean_loss: f64,
    pub total:     usize,
    /// One entry per test example, in loader order.
    pub correct:   Vec<bool>,
}

fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Cannot read tensor data: {e:?}"))
}

fn to_host_ints<B: Backend, const D: usize>(tensor: Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| anyhow::anyhow!("Cannot read tensor data: {e:?}"))
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template("{msg} {bar:40.cyan/blue} {pos}/{len} [{elapsed_precise}]") {
        pb.set_style(style);
    }
    pb
}

// ─── Feature extraction ───────────────────────────────────────────────────────

/// Encode every training example once. Needs class-index targets.
pub fn extract_features<B, E>(extractor: &E, loader: &Loader<B>) -> Result<(Tensor<B, 2>, Tensor<B, 1, Int>)>
where
    B: Backend,
    E: FeatureExtractor<B>,
{
    let pb = progress_bar(loader.num_items() as u64);
    pb.set_message("Encoding");

    let mut features = Vec::new();
    let mut labels   = Vec::new();
    for batch in loader.iter() {
        let n = batch.len();
        match batch.targets {
            BatchTargets::Classes(y) => labels.push(y),
            BatchTargets::Dense(_)   => bail!("linear evaluation needs class-index labels"),
        }
        features.push(extractor.features(batch.images));
        pb.inc(n as u64);
    }
    pb.finish_and_clear();

    if features.is_empty() {
        bail!("cannot extract features from an empty loader");
    }
    Ok((Tensor::cat(features, 0), Tensor::cat(labels, 0)))
}

// ─── Training ─────────────────────────────────────────────────────────────────

/// Fit a fresh linear classifier on `features` [n, d] / `labels` [n].
pub fn train_classifier<B: AutodiffBackend>(
    features:    Tensor<B::InnerBackend, 2>,
    labels:      Tensor<B::InnerBackend, 1, Int>,
    num_classes: usize,
    config:      &ProbeConfig,
    device:      &B::Device,
) -> Result<LinearClassifier<B::InnerBackend>> {
    let [n, dim] = features.dims();
    if n == 0 || num_classes == 0 {
        bail!("cannot fit a classifier on {} examples and {} classes", n, num_classes);
    }
    tracing::info!("L2 regularization weight: {}", config.reg_weight);

    // ── Initialise W, b ~ U(-1/√d, 1/√d) ──────────────────────────────────────
    let bound      = 1.0 / (dim as f32).sqrt();
    let mut rng    = StdRng::seed_from_u64(config.seed);
    let mut params: Vec<f32> = (0..dim * num_classes + num_classes)
        .map(|_| rng.gen_range(-bound..bound))
        .collect();

    let x  = Tensor::<B, 2>::from_inner(features);
    let y  = Tensor::<B, 1, Int>::from_inner(labels);
    let ce = CrossEntropyLossConfig::new().init(device);

    let pb = progress_bar(config.iterations as u64);
    pb.set_message("Loss: **** | Train Acc: ****%");

    // ── Objective: loss and flat gradient at `flat` ───────────────────────────
    let mut objective = |flat: &[f32]| -> Result<(f64, Vec<f32>)> {
        let (w, b) = flat.split_at(dim * num_classes);
        let w = Tensor::<B, 2>::from_data(TensorData::new(w.to_vec(), [dim, num_classes]), device)
            .require_grad();
        let b = Tensor::<B, 1>::from_data(TensorData::new(b.to_vec(), [num_classes]), device)
            .require_grad();

        let logits = x.clone().matmul(w.clone()) + b.clone().unsqueeze_dim(0);
        let loss   = ce.forward(logits.clone(), y.clone())
            + w.clone().powf_scalar(2.0).sum().mul_scalar(config.reg_weight);

        let correct: i64 = logits
            .argmax(1)
            .flatten::<1>(0, 1)
            .equal(y.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();
        let loss_val: f64 = loss.clone().into_scalar().elem();
        pb.set_message(format!(
            "Loss: {:.3} | Train Acc: {:.3}%",
            loss_val,
            100.0 * correct as f64 / n as f64
        ));

        let grads = loss.backward();
        let gw = w.grad(&grads).context("weight gradient missing")?;
        let gb = b.grad(&grads).context("bias gradient missing")?;
        let mut grad = to_host(gw)?;
        grad.extend(to_host(gb)?);
        Ok((loss_val, grad))
    };

    // ── Full-batch L-BFGS ─────────────────────────────────────────────────────
    let mut optim = Lbfgs::new(LbfgsConfig::default());
    for _ in 0..config.iterations {
        optim.step(&mut params, &mut objective)?;
        pb.inc(1);
    }
    pb.finish();

    LinearClassifier::from_flat(&params, dim, num_classes, device)
}

// ─── Evaluation ───────────────────────────────────────────────────────────────

/// Top-1 accuracy of `classifier` on features of `loader`.
pub fn test_classifier<B, E>(
    extractor:  &E,
    classifier: &LinearClassifier<B>,
    loader:     &Loader<B>,
) -> Result<LinearEvalReport>
where
    B: Backend,
    E: FeatureExtractor<B>,
{
    let pb = progress_bar(loader.num_items() as u64);
    pb.set_message("Loss: **** | Test Acc: ****%");

    let mut loss_sum = 0.0f64;
    let mut batches  = 0usize;
    let mut correct  = Vec::new();
    for batch in loader.iter() {
        let n = batch.len();
        let targets = match batch.targets {
            BatchTargets::Classes(y) => y,
            BatchTargets::Dense(_)   => bail!("linear evaluation needs class-index labels"),
        };
        let logits = classifier.forward(extractor.features(batch.images));
        let ce     = CrossEntropyLossConfig::new().init(&logits.device());
        loss_sum  += ce.forward(logits.clone(), targets.clone()).into_scalar().elem::<f64>();
        batches   += 1;

        let hits = logits.argmax(1).flatten::<1>(0, 1).equal(targets).int();
        correct.extend(to_host_ints(hits)?.into_iter().map(|h| h != 0));

        let right = correct.iter().filter(|&&c| c).count();
        pb.set_message(format!(
            "Loss: {:.3} | Test Acc: {:.3}%",
            loss_sum / batches as f64,
            100.0 * right as f64 / correct.len() as f64
        ));
        pb.inc(n as u64);
    }
    pb.finish();

    let total = correct.len();
    if total == 0 {
        bail!("test loader produced no examples");
    }
    let right = correct.iter().filter(|&&c| c).count();
    Ok(LinearEvalReport {
        accuracy:  100.0 * right as f64 / total as f64,
        mean_loss: loss_sum / batches as f64,
        total,
        correct,
    })
}

/// Percentage of rows whose target is among the `k` highest logits, for
/// each `k` in `ks`.
pub fn top_k_accuracy<B: Backend>(
    logits:  Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    ks:      &[usize],
) -> Result<Vec<f64>> {
    let [n, classes] = logits.dims();
    if n == 0 {
        bail!("top-k accuracy of an empty batch");
    }
    if let Some(&k) = ks.iter().find(|&&k| k == 0 || k > classes) {
        bail!("k = {} is outside 1..={}", k, classes);
    }
    let scores  = to_host(logits)?;
    let targets = to_host_ints(targets)?;
    if targets.len() != n {
        bail!("{} targets for {} rows", targets.len(), n);
    }

    // rank of the target within its row (0 = highest score)
    let ranks: Vec<usize> = scores
        .chunks(classes)
        .zip(&targets)
        .map(|(row, &t)| {
            let mut order: Vec<usize> = (0..classes).collect();
            order.sort_by(|&a, &b| row[b].partial_cmp(&row[a]).unwrap_or(std::cmp::Ordering::Equal));
            order.iter().position(|&c| c as i64 == t).unwrap_or(classes)
        })
        .collect();

    Ok(ks
        .iter()
        .map(|&k| 100.0 * ranks.iter().filter(|&&r| r < k).count() as f64 / n as f64)
        .collect())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataloader::DataLoaderBuilder,
    };

    use crate::data::{batcher::ImageBatcher, dataset::ImageDataset};
    use crate::domain::image_split::ImageSplit;

    /// Identity backbone: the pixels are the features.
    struct Flatten;

    impl<B: Backend> FeatureExtractor<B> for Flatten {
        fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
            images.flatten(1, 3)
        }
    }

    fn loader(images: Vec<f32>, labels: Vec<usize>, batch: usize) -> Loader<NdArray> {
        let split   = ImageSplit::new(1, 1, 2, images, labels).unwrap();
        let dataset = ImageDataset::with_class_labels(split, 2).unwrap();
        let batcher = ImageBatcher::<NdArray>::new(Default::default(), 1, 1, 2);
        DataLoaderBuilder::new(batcher).batch_size(batch).build(dataset)
    }

    #[test]
    fn test_accuracy_is_exact_fraction() {
        let device = Default::default();
        // identity weights: prediction = argmax of the two pixels
        let clf = LinearClassifier::<NdArray>::from_flat(&[1.0, 0.0, 0.0, 1.0, 0.0, 0.0], 2, 2, &device).unwrap();
        let test = loader(
            vec![1.0, 0.0, 0.0, 1.0, 2.0, 1.0, 0.5, 0.1],
            vec![0, 1, 0, 1],
            3,
        );

        let report = test_classifier(&Flatten, &clf, &test).unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.correct, vec![true, true, true, false]);
        assert_eq!(report.accuracy, 75.0);
        assert!((0.0..=100.0).contains(&report.accuracy));
    }

    #[test]
    fn test_probe_separates_separable_data() {
        type B = Autodiff<NdArray>;
        let device = Default::default();
        let images: Vec<f32> = (0..20)
            .flat_map(|i| if i % 2 == 0 { [1.0 + i as f32 * 0.01, -1.0] } else { [-1.0, 1.0 + i as f32 * 0.01] })
            .collect();
        let labels: Vec<usize> = (0..20).map(|i| i % 2).collect();
        let train = loader(images.clone(), labels.clone(), 8);
        let test  = loader(images, labels, 8);

        let (x, y) = extract_features(&Flatten, &train).unwrap();
        assert_eq!(x.dims(), [20, 2]);
        assert_eq!(y.dims(), [20]);

        let config = ProbeConfig { reg_weight: 1e-3, iterations: 5, seed: 0 };
        let clf = train_classifier::<B>(x, y, 2, &config, &device).unwrap();
        assert_eq!(clf.weight.dims(), [2, 2]);

        let report = test_classifier(&Flatten, &clf, &test).unwrap();
        assert_eq!(report.accuracy, 100.0);
        assert!(report.mean_loss < 0.5);
    }

    #[test]
    fn test_top_k() {
        let device = Default::default();
        let logits = Tensor::<NdArray, 2>::from_floats(
            [[0.1, 0.5, 0.4], [0.7, 0.2, 0.1], [0.3, 0.3, 0.4]],
            &device,
        );
        let targets = Tensor::<NdArray, 1, Int>::from_ints([2, 0, 1], &device);

        let acc = top_k_accuracy(logits.clone(), targets.clone(), &[1, 2, 3]).unwrap();
        assert!(acc[0] < 100.0);
        assert!(acc[1] < 100.0);
        assert_eq!(acc[2], 100.0);

        let all_in_top2 = Tensor::<NdArray, 1, Int>::from_ints([1, 0, 2], &device);
        assert_eq!(top_k_accuracy(logits.clone(), all_in_top2, &[2]).unwrap(), vec![100.0]);

        assert!(top_k_accuracy(logits, targets, &[4]).is_err());
    }
}
