// ============================================================
// Layer 2 — InspectUseCase
// ============================================================
// Summarises a buffer file without touching any tensor backend:
// how many experts it holds, how many snapshots each has, and
// the parameter layout of the networks.

use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::domain::trajectory::Trajectory;
use crate::infra::buffer_store::BufferStore;

#[derive(Debug, Clone, PartialEq)]
pub struct BufferReport {
    pub experts:       usize,
    /// Snapshots per expert, in buffer order.
    pub snapshots:     Vec<usize>,
    /// Shape of every parameter tensor of one snapshot.
    pub param_shapes:  Vec<Vec<usize>>,
    pub param_count:   usize,
    /// Mean L2 distance between each expert's first and last snapshot.
    pub mean_distance: f64,
}

pub struct InspectUseCase {
    buffer: PathBuf,
}

impl InspectUseCase {
    pub fn new(buffer: PathBuf) -> Self {
        Self { buffer }
    }

    pub fn execute(&self) -> Result<BufferReport> {
        let buffer = BufferStore::load(&self.buffer)?;
        tracing::info!("Loaded {} trajectories from '{}'", buffer.len(), self.buffer.display());
        summarise(&buffer)
    }
}

fn distance(trajectory: &Trajectory) -> f64 {
    match (trajectory.initial(), trajectory.last()) {
        (Some(first), Some(last)) => first
            .iter()
            .zip(last)
            .flat_map(|(a, b)| a.values.iter().zip(&b.values))
            .map(|(&x, &y)| ((x - y) as f64).powi(2))
            .sum::<f64>()
            .sqrt(),
        _ => 0.0,
    }
}

pub fn summarise(buffer: &[Trajectory]) -> Result<BufferReport> {
    let Some(first) = buffer.first().and_then(Trajectory::initial) else {
        bail!("buffer holds no trajectories");
    };
    let param_shapes: Vec<Vec<usize>> = first.iter().map(|t| t.shape.clone()).collect();

    for (i, trajectory) in buffer.iter().enumerate() {
        let layout_matches = trajectory
            .initial()
            .map(|s| s.iter().map(|t| &t.shape).eq(param_shapes.iter()))
            .unwrap_or(false);
        if !layout_matches {
            bail!("trajectory {} has a different parameter layout", i);
        }
    }

    Ok(BufferReport {
        experts:       buffer.len(),
        snapshots:     buffer.iter().map(Trajectory::len).collect(),
        param_count:   buffer[0].param_count(),
        mean_distance: buffer.iter().map(distance).sum::<f64>() / buffer.len() as f64,
        param_shapes,
    })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trajectory::HostTensor;

    fn trajectory(shift: f32, epochs: usize) -> Trajectory {
        let mut t = Trajectory::new();
        for e in 0..=epochs {
            let v = shift * e as f32;
            t.push(vec![
                HostTensor::new(vec![2, 2], vec![v; 4]).unwrap(),
                HostTensor::new(vec![2], vec![0.0; 2]).unwrap(),
            ])
            .unwrap();
        }
        t
    }

    #[test]
    fn test_summary() {
        let report = summarise(&[trajectory(1.0, 2), trajectory(0.0, 2)]).unwrap();
        assert_eq!(report.experts, 2);
        assert_eq!(report.snapshots, vec![3, 3]);
        assert_eq!(report.param_shapes, vec![vec![2, 2], vec![2]]);
        assert_eq!(report.param_count, 6);
        // distances 4 and 0
        assert!((report.mean_distance - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_buffer() {
        assert!(summarise(&[]).is_err());
    }

    #[test]
    fn test_execute_reads_buffer_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BufferStore::new(dir.path()).unwrap();
        store.push(trajectory(0.5, 4));
        let path = store.flush().unwrap().unwrap();

        let report = InspectUseCase::new(path).execute().unwrap();
        assert_eq!(report.snapshots, vec![5]);
    }
}
