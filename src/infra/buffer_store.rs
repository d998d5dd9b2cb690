// ============================================================
// Layer 6 — Buffer Store
// ============================================================
// Accumulates finished trajectories and writes them as numbered
// buffer files:
//
//   {save_dir}/replay_buffer_0.bin
//   {save_dir}/replay_buffer_1.bin
//   ...
//
// Each file is a bincode-encoded Vec<Trajectory>. A flush always
// targets the first index whose file does not exist yet, so
// earlier buffers are never overwritten.

use anyhow::{bail, Context, Result};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};

use crate::domain::trajectory::Trajectory;

pub struct BufferStore {
    dir:     PathBuf,
    pending: Vec<Trajectory>,
}

impl BufferStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create directory '{}'", dir.display()))?;
        Ok(Self { dir, pending: Vec::new() })
    }

    pub fn file_name(index: usize) -> String {
        format!("replay_buffer_{index}.bin")
    }

    /// First `n` such that `replay_buffer_{n}.bin` does not exist.
    pub fn next_index(&self) -> usize {
        (0..)
            .find(|&n| !self.dir.join(Self::file_name(n)).exists())
            .unwrap_or(0)
    }

    pub fn push(&mut self, trajectory: Trajectory) {
        self.pending.push(trajectory);
    }

    /// Write all pending trajectories to a new file and clear them.
    /// Returns `None` when nothing was pending.
    pub fn flush(&mut self) -> Result<Option<PathBuf>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let path = self.dir.join(Self::file_name(self.next_index()));
        let file = File::create(&path)
            .with_context(|| format!("Cannot create buffer '{}'", path.display()))?;
        bincode::serialize_into(BufWriter::new(file), &self.pending)
            .with_context(|| format!("Cannot write buffer '{}'", path.display()))?;

        tracing::info!("Saving {} trajectories to '{}'", self.pending.len(), path.display());
        self.pending.clear();
        Ok(Some(path))
    }

    pub fn load(path: &Path) -> Result<Vec<Trajectory>> {
        let file = File::open(path)
            .with_context(|| format!("Cannot open buffer '{}'", path.display()))?;
        let buffer: Vec<Trajectory> = bincode::deserialize_from(BufReader::new(file))
            .with_context(|| format!("Malformed buffer '{}'", path.display()))?;
        if buffer.iter().any(Trajectory::is_empty) {
            bail!("buffer '{}' contains an empty trajectory", path.display());
        }
        Ok(buffer)
    }
}
