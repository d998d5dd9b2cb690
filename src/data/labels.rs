// ============================================================
// Layer 4 — Label and Index Files
// ============================================================
// External inputs that reshape the training set:
//
//   label file      bincode-encoded HostTensor
//                     rank 1 → one class index per example
//                     rank 2 → one dense target row per example
//   distill index   JSON array of example indices, e.g. [4, 17, 2]
//   class subset    JSON array of class ids to keep, e.g. [0, 3, 5]

use anyhow::{bail, Context, Result};
use std::{
    fs::{self, File},
    io::BufReader,
    path::Path,
};

use crate::domain::image_split::ImageSplit;
use crate::domain::targets::Targets;
use crate::domain::trajectory::HostTensor;

/// Load a precomputed label file.
pub fn load_targets(path: &Path) -> Result<Targets> {
    let file = File::open(path)
        .with_context(|| format!("Cannot open label file '{}'", path.display()))?;
    let tensor: HostTensor = bincode::deserialize_from(BufReader::new(file))
        .with_context(|| format!("Malformed label file '{}'", path.display()))?;
    let tensor  = HostTensor::new(tensor.shape, tensor.values)?;
    let targets = targets_from_tensor(tensor)?;
    if targets.is_empty() {
        bail!("label file '{}' holds no examples", path.display());
    }
    Ok(targets)
}

/// Write a label file readable by [`load_targets`].
#[cfg(test)]
pub fn save_targets(path: &Path, tensor: &HostTensor) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Cannot create label file '{}'", path.display()))?;
    bincode::serialize_into(std::io::BufWriter::new(file), tensor)
        .with_context(|| format!("Cannot write label file '{}'", path.display()))?;
    Ok(())
}

pub fn targets_from_tensor(tensor: HostTensor) -> Result<Targets> {
    match tensor.shape.as_slice() {
        [_] => {
            let mut labels = Vec::with_capacity(tensor.numel());
            for &v in &tensor.values {
                if v < 0.0 || v.fract() != 0.0 {
                    bail!("class label {} is not a non-negative integer", v);
                }
                labels.push(v as usize);
            }
            let num_classes = labels.iter().max().map_or(0, |&m| m + 1);
            Targets::classes(labels, num_classes)
        }
        [_, dim] => Targets::dense(tensor.values, *dim),
        other => bail!("label tensor must be rank 1 or 2, got shape {:?}", other),
    }
}

/// Load a distilled-subset index list.
pub fn load_indices(path: &Path) -> Result<Vec<usize>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read index file '{}'", path.display()))?;
    let indices: Vec<usize> = serde_json::from_str(&text)
        .with_context(|| format!("Index file '{}' is not a JSON list of integers", path.display()))?;
    if indices.is_empty() {
        tracing::warn!("Index file '{}' is empty", path.display());
    }
    Ok(indices)
}

/// Keep only images whose class is listed in `classes`, relabelled to
/// their position in that list.
pub fn restrict_classes(split: &ImageSplit, classes: &[usize]) -> Result<ImageSplit> {
    if classes.is_empty() {
        bail!("class subset is empty");
    }
    let keep: Vec<usize> = (0..split.len())
        .filter(|&i| classes.contains(&split.labels[i]))
        .collect();
    let mut subset = split.select(&keep)?;
    if subset.is_empty() {
        bail!("no images belong to the class subset {:?}", classes);
    }
    for label in subset.labels.iter_mut() {
        // present by construction of `keep`
        if let Some(pos) = classes.iter().position(|&c| c == *label) {
            *label = pos;
        }
    }
    Ok(subset)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_file_roundtrip_dense() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_labels.bin");
        let tensor = HostTensor::new(vec![2, 3], vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]).unwrap();
        save_targets(&path, &tensor).unwrap();

        let targets = load_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets.output_dim(), 3);
    }

    #[test]
    fn test_empty_label_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_labels.bin");
        save_targets(&path, &HostTensor::new(vec![0], vec![]).unwrap()).unwrap();
        assert!(load_targets(&path).is_err());
    }

    #[test]
    fn test_rank_one_labels_are_classes() {
        let t = targets_from_tensor(HostTensor::new(vec![3], vec![2.0, 0.0, 1.0]).unwrap()).unwrap();
        assert_eq!(t, Targets::Classes { labels: vec![2, 0, 1], num_classes: 3 });
        assert!(targets_from_tensor(HostTensor::new(vec![1], vec![0.5]).unwrap()).is_err());
        assert!(targets_from_tensor(HostTensor::new(vec![1, 1, 1], vec![0.0]).unwrap()).is_err());
    }

    #[test]
    fn test_load_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idx.json");
        fs::write(&path, "[3, 1, 4]").unwrap();
        assert_eq!(load_indices(&path).unwrap(), vec![3, 1, 4]);

        fs::write(&path, "[-1]").unwrap();
        assert!(load_indices(&path).is_err());
    }

    #[test]
    fn test_restrict_classes_relabels() {
        let split = ImageSplit::new(1, 1, 1, vec![0.0, 1.0, 2.0, 3.0], vec![5, 2, 5, 9]).unwrap();
        let subset = restrict_classes(&split, &[9, 5]).unwrap();
        assert_eq!(subset.labels, vec![1, 1, 0]);
        assert_eq!(subset.images, vec![0.0, 2.0, 3.0]);

        assert!(restrict_classes(&split, &[7]).is_err());
    }
}
