// ============================================================
// Layer 4 — Image Batcher
// ============================================================
// Implements Burn's Batcher trait to stack Vec<ImageItem> into
// device tensors:
//
//   images  → [batch, channels, height, width]
//   targets → [batch] class indices   or   [batch, dim] dense rows
//
// When an Augmentation is attached every image is augmented on
// the host before upload (training loader only). In per-batch mode
// one operation is drawn for the whole batch.
//
// Reference: Burn Book §4 (Batcher)

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
    tensor::TensorData,
};

use crate::data::{augment::Augmentation, dataset::ImageItem};
use crate::domain::targets::Target;

/// Targets of one batch, matching the kind stored in the dataset.
#[derive(Debug, Clone)]
pub enum BatchTargets<B: Backend> {
    /// Class indices — shape: [batch_size]
    Classes(Tensor<B, 1, Int>),
    /// Dense target rows — shape: [batch_size, dim]
    Dense(Tensor<B, 2>),
}

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// shape: [batch_size, channels, height, width]
    pub images:  Tensor<B, 4>,
    pub targets: BatchTargets<B>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    pub device:   B::Device,
    channels:     usize,
    height:       usize,
    width:        usize,
    augmentation: Option<Augmentation>,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, channels: usize, height: usize, width: usize) -> Self {
        Self { device, channels, height, width, augmentation: None }
    }

    pub fn with_augmentation(mut self, augmentation: Option<Augmentation>) -> Self {
        self.augmentation = augmentation;
        self
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();
        let (c, h, w)  = (self.channels, self.height, self.width);

        // ── Flatten (and optionally augment) the images ───────────────────────
        let mut rng    = rand::thread_rng();
        let batch_op   = self
            .augmentation
            .as_ref()
            .filter(|aug| aug.per_batch())
            .map(|aug| aug.draw(&mut rng));
        let mut pixels = Vec::with_capacity(batch_size * c * h * w);
        for item in &items {
            let start = pixels.len();
            pixels.extend_from_slice(&item.image);
            if let Some(aug) = &self.augmentation {
                let op = batch_op.unwrap_or_else(|| aug.draw(&mut rng));
                aug.apply_op(op, &mut pixels[start..], c, h, w, &mut rng);
            }
        }
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, c, h, w]),
            &self.device,
        );

        // ── Targets ───────────────────────────────────────────────────────────
        let targets = match items.first().map(|i| &i.target) {
            Some(Target::Dense(first)) => {
                let dim = first.len();
                let values: Vec<f32> = items
                    .iter()
                    .flat_map(|i| match &i.target {
                        Target::Dense(row) => row.clone(),
                        Target::Class(_)   => vec![0.0; dim],
                    })
                    .collect();
                BatchTargets::Dense(Tensor::<B, 2>::from_data(
                    TensorData::new(values, [batch_size, dim]),
                    &self.device,
                ))
            }
            _ => {
                let classes: Vec<i32> = items
                    .iter()
                    .map(|i| match i.target {
                        Target::Class(c) => c as i32,
                        Target::Dense(_) => 0,
                    })
                    .collect();
                BatchTargets::Classes(Tensor::<B, 1, Int>::from_ints(
                    classes.as_slice(),
                    &self.device,
                ))
            }
        };

        ImageBatch { images, targets }
    }
}
