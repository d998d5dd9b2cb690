// ============================================================
// Layer 3 — Trajectory Domain Types
// ============================================================
// A trajectory is the ordered list of parameter snapshots of one
// teacher network: the initial state followed by one snapshot per
// completed epoch. Every snapshot holds the network's float
// parameters in visiting order, copied to host memory.
//
//   Trajectory
//     └── snapshots: Vec<Snapshot>        (epochs + 1 entries)
//           └── Snapshot = Vec<HostTensor> (one per parameter)
//
// A buffer file is a Vec<Trajectory>.

use anyhow::{bail, Result};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// A dense f32 tensor detached from any device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTensor {
    pub shape:  Vec<usize>,
    pub values: Vec<f32>,
}

impl HostTensor {
    /// Build a host tensor, checking that `values` fills `shape` exactly.
    pub fn new(shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            bail!(
                "shape {:?} needs {} values but {} were given",
                shape, expected, values.len()
            );
        }
        Ok(Self { shape, values })
    }

    /// Copy a device tensor to host memory.
    pub fn from_tensor<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<Self> {
        let shape  = tensor.dims().to_vec();
        let values = tensor
            .to_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Cannot read tensor data: {e:?}"))?;
        Self::new(shape, values)
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }
}

/// Every float parameter of a network at one point in training.
pub type Snapshot = Vec<HostTensor>;

/// Parameter snapshots of one teacher network in epoch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub snapshots: Vec<Snapshot>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { snapshots: Vec::new() }
    }

    /// Append a snapshot. All snapshots of a trajectory must describe
    /// the same parameter layout.
    pub fn push(&mut self, snapshot: Snapshot) -> Result<()> {
        if let Some(first) = self.snapshots.first() {
            let same_layout = first.len() == snapshot.len()
                && first.iter().zip(&snapshot).all(|(a, b)| a.shape == b.shape);
            if !same_layout {
                bail!("snapshot layout differs from the trajectory's initial snapshot");
            }
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn initial(&self) -> Option<&Snapshot> {
        self.snapshots.first()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// Number of scalar parameters in one snapshot.
    pub fn param_count(&self) -> usize {
        self.initial()
            .map(|s| s.iter().map(HostTensor::numel).sum())
            .unwrap_or(0)
    }
}
