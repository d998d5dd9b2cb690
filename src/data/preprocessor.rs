// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Two transforms applied to whole splits before training:
//
//   1. Per-channel normalisation   x ← (x - mean[c]) / std[c]
//   2. ZCA whitening (optional)    x ← (x - μ) · W
//                                  W = (Σ + εI)^{-1/2}
//
// Σ is the pixel covariance of the training split. Its inverse
// square root is computed on the tensor backend with the coupled
// Newton–Schulz iteration, which needs nothing but matmuls:
//
//   Y₀ = Σ'/‖Σ'‖_F,  Z₀ = I
//   T  = ½(3I − Z·Y),  Y ← Y·T,  Z ← T·Z
//   Z  → (Σ'/‖Σ'‖_F)^{-1/2}
//
// Normalisation is skipped when ZCA is on, matching the usual
// distillation setup (whitening on raw [0, 1] pixels).
//
// Reference: Higham (2008) Functions of Matrices, §6.3

use anyhow::{bail, Result};
use burn::{prelude::*, tensor::TensorData};

use crate::data::loader::DatasetKind;
use crate::domain::image_split::ImageSplit;

/// Regulariser added to the covariance diagonal before whitening.
pub const ZCA_EPSILON: f32 = 0.1;

const NEWTON_SCHULZ_STEPS: usize = 30;
const ZCA_CHUNK_ROWS:      usize = 1024;

// ─── Channel normalisation ────────────────────────────────────────────────────

pub struct Preprocessor {
    mean: Vec<f32>,
    std:  Vec<f32>,
}

impl Preprocessor {
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Self {
        Self { mean, std }
    }

    /// Canonical statistics for `kind`, or the identity when ZCA will follow.
    pub fn for_dataset(kind: DatasetKind, zca: bool) -> Self {
        if zca && kind.supports_zca() {
            let c = kind.mean().len();
            Self::new(vec![0.0; c], vec![1.0; c])
        } else {
            Self::new(kind.mean().to_vec(), kind.std().to_vec())
        }
    }

    /// Normalise every image of `split` in place.
    pub fn normalize(&self, split: &mut ImageSplit) -> Result<()> {
        if self.mean.len() != split.channels || self.std.len() != split.channels {
            bail!(
                "normalisation has {} channels but images have {}",
                self.mean.len(), split.channels
            );
        }
        let plane = split.height * split.width;
        for (i, v) in split.images.iter_mut().enumerate() {
            let ch = (i / plane) % self.mean.len();
            *v = (*v - self.mean[ch]) / self.std[ch];
        }
        Ok(())
    }
}

// ─── ZCA whitening ────────────────────────────────────────────────────────────

pub struct ZcaWhitening<B: Backend> {
    /// Pixel mean, shape [1, d]
    mean:      Tensor<B, 2>,
    /// Whitening matrix, shape [d, d]
    transform: Tensor<B, 2>,
    device:    B::Device,
}

impl<B: Backend> ZcaWhitening<B> {
    /// Fit on a (training) split.
    pub fn fit(split: &ImageSplit, epsilon: f32, device: &B::Device) -> Result<Self> {
        if split.len() < 2 {
            bail!("ZCA needs at least two images, got {}", split.len());
        }
        let d = split.image_len();
        let n = split.len();

        // ── Mean over all images ──────────────────────────────────────────────
        let mut mean = Tensor::<B, 2>::zeros([1, d], device);
        for rows in row_chunks(split, device) {
            mean = mean + rows.sum_dim(0);
        }
        let mean = mean / n as f32;

        // ── Covariance Σ = Xcᵀ·Xc / (n - 1) ───────────────────────────────────
        let mut cov = Tensor::<B, 2>::zeros([d, d], device);
        for rows in row_chunks(split, device) {
            let centered = rows - mean.clone();
            cov = cov + centered.clone().transpose().matmul(centered);
        }
        let cov = cov / (n - 1) as f32;
        let regularised = cov + identity::<B>(d, device) * epsilon;

        let transform = inverse_sqrt(regularised, device)?;
        tracing::info!("Fitted ZCA whitening on {} images ({} dims)", n, d);

        Ok(Self { mean, transform, device: device.clone() })
    }

    /// Whiten every image of `split` in place.
    pub fn apply(&self, split: &mut ImageSplit) -> Result<()> {
        let d = split.image_len();
        if self.transform.dims() != [d, d] {
            bail!("ZCA was fitted on {} dims but images have {}", self.transform.dims()[0], d);
        }
        let mut whitened = Vec::with_capacity(split.images.len());
        for rows in row_chunks(split, &self.device) {
            let out = (rows - self.mean.clone()).matmul(self.transform.clone());
            let values = out
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| anyhow::anyhow!("Cannot read whitened data: {e:?}"))?;
            whitened.extend(values);
        }
        split.images = whitened;
        Ok(())
    }
}

/// Upload a split as [rows, d] tensors, a chunk at a time.
fn row_chunks<'a, B: Backend>(
    split:  &'a ImageSplit,
    device: &'a B::Device,
) -> impl Iterator<Item = Tensor<B, 2>> + 'a {
    let d = split.image_len();
    split.images.chunks(ZCA_CHUNK_ROWS * d).map(move |chunk| {
        let rows = chunk.len() / d;
        Tensor::<B, 2>::from_data(TensorData::new(chunk.to_vec(), [rows, d]), device)
    })
}

fn identity<B: Backend>(d: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut values = vec![0.0f32; d * d];
    for i in 0..d {
        values[i * d + i] = 1.0;
    }
    Tensor::from_data(TensorData::new(values, [d, d]), device)
}

/// A^{-1/2} for a symmetric positive definite A.
fn inverse_sqrt<B: Backend>(a: Tensor<B, 2>, device: &B::Device) -> Result<Tensor<B, 2>> {
    let [d, _] = a.dims();
    let norm: f32 = a.clone().powf_scalar(2.0).sum().sqrt().into_scalar().elem::<f32>();
    if !(norm.is_finite() && norm > 0.0) {
        bail!("covariance has invalid Frobenius norm {}", norm);
    }

    let eye = identity::<B>(d, device);
    let mut y = a / norm;
    let mut z = eye.clone();
    for _ in 0..NEWTON_SCHULZ_STEPS {
        let t = (eye.clone() * 3.0 - z.clone().matmul(y.clone())) * 0.5;
        y = y.matmul(t.clone());
        z = t.matmul(z);
    }
    Ok(z / norm.sqrt())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_normalize_per_channel() {
        let mut split = ImageSplit::new(2, 1, 2, vec![1.0, 3.0, 5.0, 7.0], vec![0]).unwrap();
        Preprocessor::new(vec![1.0, 5.0], vec![2.0, 1.0]).normalize(&mut split).unwrap();
        assert_eq!(split.images, vec![0.0, 1.0, 0.0, 2.0]);
    }

    #[test]
    fn test_normalize_channel_mismatch() {
        let mut split = ImageSplit::new(1, 1, 1, vec![1.0], vec![0]).unwrap();
        assert!(Preprocessor::new(vec![0.0; 3], vec![1.0; 3]).normalize(&mut split).is_err());
    }

    #[test]
    fn test_zca_decorrelates() {
        let mut rng = StdRng::seed_from_u64(7);
        let n = 400;
        let mut images = Vec::with_capacity(n * 2);
        for _ in 0..n {
            let a: f32 = rng.gen_range(-1.0..1.0);
            let b: f32 = rng.gen_range(-1.0..1.0);
            images.push(a);
            images.push(a + 0.5 * b);
        }
        let mut split = ImageSplit::new(2, 1, 1, images, vec![0; n]).unwrap();

        let device = Default::default();
        let zca = ZcaWhitening::<NdArray>::fit(&split, 1e-3, &device).unwrap();
        zca.apply(&mut split).unwrap();

        // whitened covariance should be close to the identity
        let mut cov = [[0.0f64; 2]; 2];
        let mean: Vec<f64> = (0..2)
            .map(|j| (0..n).map(|i| split.images[i * 2 + j] as f64).sum::<f64>() / n as f64)
            .collect();
        for i in 0..n {
            for r in 0..2 {
                for c in 0..2 {
                    cov[r][c] += (split.images[i * 2 + r] as f64 - mean[r])
                               * (split.images[i * 2 + c] as f64 - mean[c]);
                }
            }
        }
        for r in 0..2 {
            for c in 0..2 {
                let got = cov[r][c] / (n - 1) as f64;
                let want = if r == c { 1.0 } else { 0.0 };
                assert!((got - want).abs() < 0.05, "cov[{r}][{c}] = {got}");
            }
        }
    }
}
