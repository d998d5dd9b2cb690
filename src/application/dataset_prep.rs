// ============================================================
// Layer 2 — Dataset Preparation
// ============================================================
// Shared by both workflows:
//
//   Step 1: Load the train/test splits          (Layer 4 - data)
//   Step 2: Optional class subset               (Layer 4 - data)
//   Step 3: Channel normalisation / ZCA         (Layer 4 - data)
//   Step 4: Wrap in datasets and data loaders   (Layer 4 - data)

use anyhow::Result;
use burn::{data::dataloader::DataLoaderBuilder, prelude::*};
use std::path::Path;

use crate::data::{
    batcher::ImageBatcher,
    dataset::{ImageDataset, SubsetDataset},
    labels::{load_indices, restrict_classes},
    loader::DatasetKind,
    preprocessor::{Preprocessor, ZcaWhitening, ZCA_EPSILON},
};
use crate::domain::{
    image_split::{DatasetInfo, ImageSplit},
    traits::DatasetSource,
};
use crate::ml::trainer::Loader;

pub struct PreparedData {
    pub info:  DatasetInfo,
    pub train: ImageSplit,
    pub test:  ImageSplit,
}

/// Load, subset and normalise both splits of `kind`.
pub fn prepare_splits<B: Backend>(
    source: &dyn DatasetSource,
    kind:   DatasetKind,
    zca:    bool,
    subset: Option<&Path>,
    device: &B::Device,
) -> Result<PreparedData> {
    // ── Step 1: Load ──────────────────────────────────────────────────────────
    let (mut info, mut train, mut test) = source.load()?;
    tracing::info!(
        "Loaded {}: {} train / {} test images of {}x{}x{}",
        info.name, train.len(), test.len(), info.channels, info.height, info.width
    );

    // ── Step 2: Class subset ──────────────────────────────────────────────────
    if let Some(path) = subset {
        let classes = load_indices(path)?;
        train = restrict_classes(&train, &classes)?;
        test  = restrict_classes(&test, &classes)?;
        info.num_classes = classes.len();
        tracing::info!(
            "Class subset {:?}: {} train / {} test images",
            classes, train.len(), test.len()
        );
    }

    // ── Step 3: Normalise ─────────────────────────────────────────────────────
    let preprocessor = Preprocessor::for_dataset(kind, zca);
    preprocessor.normalize(&mut train)?;
    preprocessor.normalize(&mut test)?;

    if zca && kind.supports_zca() {
        tracing::info!("Fitting ZCA whitening (epsilon = {})", ZCA_EPSILON);
        let whitening = ZcaWhitening::<B>::fit(&train, ZCA_EPSILON, device)?;
        whitening.apply(&mut train)?;
        whitening.apply(&mut test)?;
    } else if zca {
        tracing::warn!("ZCA requested but {} is not a colour dataset; skipping", kind.name());
    }

    for (ch, (mean, std)) in train.channel_stats().into_iter().enumerate() {
        tracing::info!("real images channel {}, mean = {:.4}, std = {:.4}", ch, mean, std);
    }

    Ok(PreparedData { info, train, test })
}

/// Loader over `dataset`, restricted to `indices` when given, in
/// shuffled order when `shuffle_seed` is set.
pub fn build_loader<B: Backend>(
    dataset:      ImageDataset,
    indices:      Option<Vec<usize>>,
    batcher:      ImageBatcher<B>,
    batch_size:   usize,
    shuffle_seed: Option<u64>,
    num_workers:  usize,
) -> Result<Loader<B>> {
    let indices = indices.unwrap_or_else(|| (0..dataset.split().len()).collect());
    let subset  = SubsetDataset::new(dataset, indices)?;

    let mut builder = DataLoaderBuilder::new(batcher).batch_size(batch_size);
    if let Some(seed) = shuffle_seed {
        builder = builder.shuffle(seed);
    }
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }
    Ok(builder.build(subset))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use std::fs;

    fn dataset(n: usize) -> ImageDataset {
        let images = (0..n * 4).map(|i| i as f32).collect();
        let labels = (0..n).map(|i| i % 3).collect();
        let split  = ImageSplit::new(1, 2, 2, images, labels).unwrap();
        ImageDataset::with_class_labels(split, 3).unwrap()
    }

    fn batcher() -> ImageBatcher<NdArray> {
        ImageBatcher::new(Default::default(), 1, 2, 2)
    }

    #[test]
    fn test_distill_index_restricts_loader_size() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("distill_idx.json");
        fs::write(&path, "[9, 2, 14, 0, 5]").unwrap();
        let indices = load_indices(&path).unwrap();

        let loader = build_loader(dataset(20), Some(indices.clone()), batcher(), 2, Some(3), 0).unwrap();
        let seen: usize = loader.iter().map(|b| b.len()).sum();
        assert_eq!(seen, indices.len());
        assert_eq!(loader.num_items(), 5);
    }

    #[test]
    fn test_full_loader_without_indices() {
        let loader = build_loader(dataset(7), None, batcher(), 3, None, 0).unwrap();
        let sizes: Vec<usize> = loader.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        assert!(build_loader(dataset(4), Some(vec![4]), batcher(), 2, None, 0).is_err());
    }
}
