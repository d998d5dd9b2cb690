// ============================================================
// Layer 3 — Training Targets
// ============================================================
// The supervision signal for one split. Either integer class
// indices (hard labels) or one dense target vector per example,
// e.g. a precomputed representation from another network.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Targets {
    /// One class index per example.
    Classes { labels: Vec<usize>, num_classes: usize },
    /// `dim` values per example, row-major.
    Dense { values: Vec<f32>, dim: usize },
}

impl Targets {
    pub fn classes(labels: Vec<usize>, num_classes: usize) -> Result<Self> {
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            bail!("label {} is outside 0..{}", bad, num_classes);
        }
        Ok(Targets::Classes { labels, num_classes })
    }

    pub fn dense(values: Vec<f32>, dim: usize) -> Result<Self> {
        if dim == 0 || values.len() % dim != 0 {
            bail!("{} values cannot be split into rows of {}", values.len(), dim);
        }
        Ok(Targets::Dense { values, dim })
    }

    /// Number of examples (leading dimension).
    pub fn len(&self) -> usize {
        match self {
            Targets::Classes { labels, .. } => labels.len(),
            Targets::Dense { values, dim }  => values.len() / dim,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width of the network output these targets supervise.
    pub fn output_dim(&self) -> usize {
        match self {
            Targets::Classes { num_classes, .. } => *num_classes,
            Targets::Dense { dim, .. }           => *dim,
        }
    }

    /// Fail unless there is exactly one target per example of a split.
    pub fn ensure_len(&self, expected: usize, split: &str) -> Result<()> {
        if self.len() != expected {
            bail!(
                "{} targets have leading dimension {} but the split has {} examples",
                split, self.len(), expected
            );
        }
        Ok(())
    }

    /// Class targets become one-hot rows; dense targets are unchanged.
    pub fn to_dense(&self) -> Self {
        match self {
            Targets::Classes { labels, num_classes } => {
                let mut values = vec![0.0f32; labels.len() * num_classes];
                for (row, &label) in labels.iter().enumerate() {
                    values[row * num_classes + label] = 1.0;
                }
                Targets::Dense { values, dim: *num_classes }
            }
            dense => dense.clone(),
        }
    }

    /// Target of example `index`.
    pub fn get(&self, index: usize) -> Option<Target> {
        match self {
            Targets::Classes { labels, .. } => labels.get(index).map(|&l| Target::Class(l)),
            Targets::Dense { values, dim }  => values
                .get(index * dim..(index + 1) * dim)
                .map(|row| Target::Dense(row.to_vec())),
        }
    }
}

/// The target of a single example.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Class(usize),
    Dense(Vec<f32>),
}
