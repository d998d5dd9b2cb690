// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads the raw image datasets from their original binary
// distributions into in-memory ImageSplits, pixels scaled to
// [0, 1]. Normalisation happens later in the preprocessor.
//
// Supported layouts under --data-path:
//
//   MNIST/                      FashionMNIST/
//     train-images-idx3-ubyte     (same four files)
//     train-labels-idx1-ubyte
//     t10k-images-idx3-ubyte
//     t10k-labels-idx1-ubyte
//
//   cifar-10-batches-bin/       cifar-100-binary/
//     data_batch_1.bin .. 5       train.bin
//     test_batch.bin              test.bin
//
// IDX: big-endian magic (0x0803 images / 0x0801 labels), then
// one u32 per dimension, then raw u8 data.
// CIFAR-10 record:  1 label byte + 3072 pixel bytes (CHW).
// CIFAR-100 record: coarse byte + fine byte + 3072 pixel bytes.

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::domain::image_split::{DatasetInfo, ImageSplit};
use crate::domain::traits::DatasetSource;

/// The datasets this loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Mnist,
    FashionMnist,
    Cifar10,
    Cifar100,
}

impl DatasetKind {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Mnist        => "MNIST",
            DatasetKind::FashionMnist => "FashionMNIST",
            DatasetKind::Cifar10      => "CIFAR10",
            DatasetKind::Cifar100     => "CIFAR100",
        }
    }

    pub fn num_classes(&self) -> usize {
        match self {
            DatasetKind::Cifar100 => 100,
            _                     => 10,
        }
    }

    /// Per-channel mean used for normalisation.
    pub fn mean(&self) -> &'static [f32] {
        match self {
            DatasetKind::Mnist        => &[0.1307],
            DatasetKind::FashionMnist => &[0.2861],
            DatasetKind::Cifar10      => &[0.4914, 0.4822, 0.4465],
            DatasetKind::Cifar100     => &[0.5071, 0.4866, 0.4409],
        }
    }

    /// Per-channel standard deviation used for normalisation.
    pub fn std(&self) -> &'static [f32] {
        match self {
            DatasetKind::Mnist        => &[0.3081],
            DatasetKind::FashionMnist => &[0.3530],
            DatasetKind::Cifar10      => &[0.2023, 0.1994, 0.2010],
            DatasetKind::Cifar100     => &[0.2673, 0.2564, 0.2762],
        }
    }

    /// ZCA whitening only applies to the colour datasets.
    pub fn supports_zca(&self) -> bool {
        matches!(self, DatasetKind::Cifar10 | DatasetKind::Cifar100)
    }
}

impl FromStr for DatasetKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MNIST"        => Ok(DatasetKind::Mnist),
            "FashionMNIST" => Ok(DatasetKind::FashionMnist),
            "CIFAR10"      => Ok(DatasetKind::Cifar10),
            "CIFAR100"     => Ok(DatasetKind::Cifar100),
            other => bail!(
                "unknown dataset '{}' (expected MNIST, FashionMNIST, CIFAR10 or CIFAR100)",
                other
            ),
        }
    }
}

/// Loads one dataset from its binary files.
pub struct DatasetLoader {
    kind:      DatasetKind,
    data_path: PathBuf,
}

impl DatasetLoader {
    pub fn new(kind: DatasetKind, data_path: impl Into<PathBuf>) -> Self {
        Self { kind, data_path: data_path.into() }
    }
}

impl DatasetSource for DatasetLoader {
    fn load(&self) -> Result<(DatasetInfo, ImageSplit, ImageSplit)> {
        let (train, test) = match self.kind {
            DatasetKind::Mnist | DatasetKind::FashionMnist => {
                let dir = self.data_path.join(self.kind.name());
                (
                    read_idx_split(&dir, "train")?,
                    read_idx_split(&dir, "t10k")?,
                )
            }
            DatasetKind::Cifar10 => {
                let dir = self.data_path.join("cifar-10-batches-bin");
                let train_files: Vec<PathBuf> = (1..=5)
                    .map(|i| dir.join(format!("data_batch_{i}.bin")))
                    .collect();
                (
                    read_cifar_files(&train_files, 1)?,
                    read_cifar_files(&[dir.join("test_batch.bin")], 1)?,
                )
            }
            DatasetKind::Cifar100 => {
                let dir = self.data_path.join("cifar-100-binary");
                (
                    read_cifar_files(&[dir.join("train.bin")], 2)?,
                    read_cifar_files(&[dir.join("test.bin")], 2)?,
                )
            }
        };

        let info = DatasetInfo {
            name:        self.kind.name().to_string(),
            channels:    train.channels,
            height:      train.height,
            width:       train.width,
            num_classes: self.kind.num_classes(),
        };
        Ok((info, train, test))
    }
}

// ─── IDX (MNIST family) ───────────────────────────────────────────────────────

fn read_idx_split(dir: &Path, prefix: &str) -> Result<ImageSplit> {
    let images = read_file(&dir.join(format!("{prefix}-images-idx3-ubyte")))?;
    let labels = read_file(&dir.join(format!("{prefix}-labels-idx1-ubyte")))?;
    parse_idx(&images, &labels)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Cannot read dataset file '{}'", path.display()))
}

fn be_u32(bytes: &[u8], offset: usize) -> Result<usize> {
    let b = bytes
        .get(offset..offset + 4)
        .context("IDX header is truncated")?;
    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize)
}

/// Parse an IDX image file and its label file.
pub fn parse_idx(images: &[u8], labels: &[u8]) -> Result<ImageSplit> {
    if be_u32(images, 0)? != 0x0803 {
        bail!("not an IDX image file (bad magic)");
    }
    if be_u32(labels, 0)? != 0x0801 {
        bail!("not an IDX label file (bad magic)");
    }

    let count  = be_u32(images, 4)?;
    let height = be_u32(images, 8)?;
    let width  = be_u32(images, 12)?;
    let pixels = &images[16..];
    if pixels.len() != count * height * width {
        bail!("IDX image file holds {} bytes, expected {}", pixels.len(), count * height * width);
    }

    let label_count = be_u32(labels, 4)?;
    let label_bytes = &labels[8..];
    if label_count != count || label_bytes.len() != count {
        bail!("IDX label count {} does not match {} images", label_count, count);
    }

    let images = pixels.iter().map(|&p| p as f32 / 255.0).collect();
    let labels = label_bytes.iter().map(|&l| l as usize).collect();
    ImageSplit::new(1, height, width, images, labels)
}

// ─── CIFAR binary ─────────────────────────────────────────────────────────────

const CIFAR_SIDE:   usize = 32;
const CIFAR_PIXELS: usize = 3 * CIFAR_SIDE * CIFAR_SIDE;

fn read_cifar_files(paths: &[PathBuf], label_bytes: usize) -> Result<ImageSplit> {
    let mut images = Vec::new();
    let mut labels = Vec::new();
    for path in paths {
        let bytes = read_file(path)?;
        let (mut imgs, mut lbls) = parse_cifar(&bytes, label_bytes)
            .with_context(|| format!("Malformed CIFAR file '{}'", path.display()))?;
        tracing::debug!("Read {} records from '{}'", lbls.len(), path.display());
        images.append(&mut imgs);
        labels.append(&mut lbls);
    }
    ImageSplit::new(3, CIFAR_SIDE, CIFAR_SIDE, images, labels)
}

/// Parse CIFAR records. The last label byte is the class
/// (the fine label for CIFAR-100).
pub fn parse_cifar(bytes: &[u8], label_bytes: usize) -> Result<(Vec<f32>, Vec<usize>)> {
    let record = label_bytes + CIFAR_PIXELS;
    if bytes.len() % record != 0 {
        bail!("{} bytes is not a whole number of {}-byte records", bytes.len(), record);
    }
    let count = bytes.len() / record;
    let mut images = Vec::with_capacity(count * CIFAR_PIXELS);
    let mut labels = Vec::with_capacity(count);
    for rec in bytes.chunks_exact(record) {
        labels.push(rec[label_bytes - 1] as usize);
        images.extend(rec[label_bytes..].iter().map(|&p| p as f32 / 255.0));
    }
    Ok((images, labels))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn idx_images(count: u32, h: u32, w: u32, fill: u8) -> Vec<u8> {
        let mut v = Vec::new();
        for x in [0x0803u32, count, h, w] {
            v.extend_from_slice(&x.to_be_bytes());
        }
        v.extend(std::iter::repeat(fill).take((count * h * w) as usize));
        v
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&0x0801u32.to_be_bytes());
        v.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        v.extend_from_slice(labels);
        v
    }

    #[test]
    fn test_parse_idx() {
        let split = parse_idx(&idx_images(2, 3, 3, 255), &idx_labels(&[7, 1])).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!((split.channels, split.height, split.width), (1, 3, 3));
        assert_eq!(split.labels, vec![7, 1]);
        assert!(split.images.iter().all(|&p| (p - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_parse_idx_count_mismatch() {
        assert!(parse_idx(&idx_images(2, 2, 2, 0), &idx_labels(&[1])).is_err());
    }

    #[test]
    fn test_parse_cifar100_uses_fine_label() {
        let mut bytes = vec![4u8, 42u8];
        bytes.extend(std::iter::repeat(51u8).take(CIFAR_PIXELS));
        let (images, labels) = parse_cifar(&bytes, 2).unwrap();
        assert_eq!(labels, vec![42]);
        assert_eq!(images.len(), CIFAR_PIXELS);
        assert!((images[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_loader_reads_mnist_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mnist = dir.path().join("MNIST");
        fs::create_dir_all(&mnist).unwrap();
        fs::write(mnist.join("train-images-idx3-ubyte"), idx_images(3, 4, 4, 0)).unwrap();
        fs::write(mnist.join("train-labels-idx1-ubyte"), idx_labels(&[0, 1, 2])).unwrap();
        fs::write(mnist.join("t10k-images-idx3-ubyte"), idx_images(1, 4, 4, 0)).unwrap();
        fs::write(mnist.join("t10k-labels-idx1-ubyte"), idx_labels(&[9])).unwrap();

        let (info, train, test) = DatasetLoader::new(DatasetKind::Mnist, dir.path()).load().unwrap();
        assert_eq!(info.channels, 1);
        assert_eq!(info.num_classes, 10);
        assert_eq!(train.len(), 3);
        assert_eq!(test.labels, vec![9]);
    }

    #[test]
    fn test_unknown_dataset_name() {
        assert!("ImageNet".parse::<DatasetKind>().is_err());
        assert_eq!("CIFAR100".parse::<DatasetKind>().unwrap(), DatasetKind::Cifar100);
    }
}
