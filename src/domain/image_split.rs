// ============================================================
// Layer 3 — Image Split Domain Types
// ============================================================
// One split (train or test) of an image classification dataset,
// held fully in memory as a flat NCHW f32 buffer plus the
// integer class label of every image.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Shape and class-count metadata shared by both splits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub name:        String,
    pub channels:    usize,
    pub height:      usize,
    pub width:       usize,
    pub num_classes: usize,
}

/// All images of one split in NCHW order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSplit {
    pub channels: usize,
    pub height:   usize,
    pub width:    usize,
    pub images:   Vec<f32>,
    pub labels:   Vec<usize>,
}

impl ImageSplit {
    pub fn new(
        channels: usize,
        height:   usize,
        width:    usize,
        images:   Vec<f32>,
        labels:   Vec<usize>,
    ) -> Result<Self> {
        let image_len = channels * height * width;
        if image_len == 0 || images.len() != labels.len() * image_len {
            bail!(
                "{} pixel values do not form {} images of {}x{}x{}",
                images.len(), labels.len(), channels, height, width
            );
        }
        Ok(Self { channels, height, width, images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// Pixels of image `index` (C*H*W values).
    pub fn image(&self, index: usize) -> &[f32] {
        let n = self.image_len();
        &self.images[index * n..(index + 1) * n]
    }

    /// Keep only the images at `indices`, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let mut images = Vec::with_capacity(indices.len() * self.image_len());
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            if i >= self.len() {
                bail!("index {} out of range for a split of {} images", i, self.len());
            }
            images.extend_from_slice(self.image(i));
            labels.push(self.labels[i]);
        }
        Self::new(self.channels, self.height, self.width, images, labels)
    }

    /// Mean and standard deviation of every channel over all images.
    pub fn channel_stats(&self) -> Vec<(f64, f64)> {
        let plane = self.height * self.width;
        (0..self.channels)
            .map(|ch| {
                let mut sum    = 0.0f64;
                let mut sum_sq = 0.0f64;
                for img in 0..self.len() {
                    let start = img * self.image_len() + ch * plane;
                    for &v in &self.images[start..start + plane] {
                        sum    += v as f64;
                        sum_sq += (v as f64) * (v as f64);
                    }
                }
                let n = (self.len() * plane).max(1) as f64;
                let mean = sum / n;
                // unbiased, like torch.std
                let var = if n > 1.0 { (sum_sq - n * mean * mean) / (n - 1.0) } else { 0.0 };
                (mean, var.max(0.0).sqrt())
            })
            .collect()
    }
}
