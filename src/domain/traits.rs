// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seams between the layers:
//   - DatasetSource    → anything that can produce train/test splits
//                        (MNIST IDX files, CIFAR binary batches, ...)
//   - FeatureExtractor → anything that maps an image batch to a
//                        feature matrix (a backbone network with its
//                        classifier stripped, or a plain flatten)
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use anyhow::Result;
use burn::prelude::*;

use crate::domain::image_split::{DatasetInfo, ImageSplit};

// ─── DatasetSource ────────────────────────────────────────────────────────────
/// Any component that can load an image classification dataset.
pub trait DatasetSource {
    /// Load metadata plus the (train, test) splits.
    fn load(&self) -> Result<(DatasetInfo, ImageSplit, ImageSplit)>;
}

// ─── FeatureExtractor ─────────────────────────────────────────────────────────
/// Maps images `[n, c, h, w]` to features `[n, d]`.
pub trait FeatureExtractor<B: Backend> {
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}
