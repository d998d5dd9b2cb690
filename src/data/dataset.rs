use std::{marker::PhantomData, sync::Arc};

use anyhow::{bail, Result};
use burn::data::dataset::Dataset;

use crate::domain::image_split::ImageSplit;
use crate::domain::targets::{Target, Targets};

/// One image (C*H*W values) with its training target.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image:  Vec<f32>,
    pub target: Target,
}

/// An in-memory split paired with its targets. Cloning is cheap.
#[derive(Clone)]
pub struct ImageDataset {
    split:   Arc<ImageSplit>,
    targets: Arc<Targets>,
}

impl ImageDataset {
    pub fn new(split: ImageSplit, targets: Targets) -> Result<Self> {
        targets.ensure_len(split.len(), "dataset")?;
        Ok(Self { split: Arc::new(split), targets: Arc::new(targets) })
    }

    /// Images labelled with the split's own class indices.
    pub fn with_class_labels(split: ImageSplit, num_classes: usize) -> Result<Self> {
        let targets = Targets::classes(split.labels.clone(), num_classes)?;
        Self::new(split, targets)
    }

    pub fn split(&self) -> &ImageSplit {
        &self.split
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        if index >= self.split.len() {
            return None;
        }
        Some(ImageItem {
            image:  self.split.image(index).to_vec(),
            target: self.targets.get(index)?,
        })
    }

    fn len(&self) -> usize {
        self.split.len()
    }
}

/// A view of `inner` restricted to `indices`, in that order.
pub struct SubsetDataset<D, I> {
    inner:   D,
    indices: Vec<usize>,
    input:   PhantomData<I>,
}

impl<D, I> SubsetDataset<D, I>
where
    D: Dataset<I>,
{
    pub fn new(inner: D, indices: Vec<usize>) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= inner.len()) {
            bail!("subset index {} out of range for {} examples", bad, inner.len());
        }
        Ok(Self { inner, indices, input: PhantomData })
    }
}

impl<D, I> Dataset<I> for SubsetDataset<D, I>
where
    D: Dataset<I>,
    I: Send + Sync,
{
    fn get(&self, index: usize) -> Option<I> {
        self.indices.get(index).and_then(|&i| self.inner.get(i))
    }

    fn len(&self) -> usize {
        self.indices.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> ImageDataset {
        let split = ImageSplit::new(1, 1, 2, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0], vec![0, 1, 2]).unwrap();
        ImageDataset::with_class_labels(split, 3).unwrap()
    }

    #[test]
    fn test_get_pairs_image_and_target() {
        let ds = dataset();
        let item = ds.get(2).unwrap();
        assert_eq!(item.image, vec![4.0, 5.0]);
        assert_eq!(item.target, Target::Class(2));
        assert!(ds.get(3).is_none());
    }

    #[test]
    fn test_target_count_must_match() {
        let split = ImageSplit::new(1, 1, 1, vec![0.0, 1.0], vec![0, 1]).unwrap();
        let targets = Targets::classes(vec![0], 2).unwrap();
        assert!(ImageDataset::new(split, targets).is_err());
    }

    #[test]
    fn test_subset_len_and_order() {
        let subset = SubsetDataset::<_, ImageItem>::new(dataset(), vec![2, 0]).unwrap();
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.get(0).unwrap().target, Target::Class(2));
        assert_eq!(subset.get(1).unwrap().image, vec![0.0, 1.0]);
        assert!(subset.get(2).is_none());
        assert!(SubsetDataset::<_, ImageItem>::new(dataset(), vec![3]).is_err());
    }
}
