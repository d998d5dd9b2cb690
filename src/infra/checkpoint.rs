// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores network weights using Burn's DefaultRecorder
// (named MessagePack, full precision).
//
// Files written into one save directory per run:
//
//   {save_dir}/
//     original_buffer_model_{expert}_{epoch}.mpk  ← after each epoch
//     full_buffer_{expert}.mpk                    ← final weights
//     buffer_config.json                          ← hyper-parameters
//
// The per-epoch files are for inspecting individual experts; the
// trajectories themselves go to the buffer files. A network is
// rebuilt from its NetworkConfig before a record is loaded into it,
// and loading fails if the architecture does not match.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{DefaultRecorder, FileRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Serialize};

use crate::ml::model::Network;

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Weights of `expert` after `epoch` (1-based).
    pub fn save_epoch<B: Backend>(&self, model: &Network<B>, expert: usize, epoch: usize) -> Result<PathBuf> {
        self.save_network(model, &format!("original_buffer_model_{expert}_{epoch}"))
    }

    /// Final weights of `expert`.
    pub fn save_final<B: Backend>(&self, model: &Network<B>, expert: usize) -> Result<PathBuf> {
        self.save_network(model, &format!("full_buffer_{expert}"))
    }

    /// Write `{dir}/{name}` (the recorder adds the extension).
    pub fn save_network<B: Backend>(&self, model: &Network<B>, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        DefaultRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        tracing::debug!("Saved checkpoint '{}'", path.display());
        Ok(path)
    }

    /// Load a record saved by [`save_network`](Self::save_network) into `model`.
    ///
    /// `path` may be given with or without the recorder's extension.
    pub fn load_network<B: Backend>(
        path:   &Path,
        model:  Network<B>,
        device: &B::Device,
    ) -> Result<Network<B>> {
        let path = strip_record_extension::<B>(path);
        let record = DefaultRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;
        Ok(model.load_record(record))
    }

    /// Save any serialisable config as pretty JSON in `{dir}/{name}`.
    pub fn save_config<T: Serialize>(&self, cfg: &T, name: &str) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved config to '{}'", path.display());
        Ok(path)
    }

    pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config '{}'", path.display()))
    }
}

/// `foo.mpk` → `foo`; other paths are returned unchanged.
fn strip_record_extension<B: Backend>(path: &Path) -> PathBuf {
    let ext = <DefaultRecorder as FileRecorder<B>>::file_extension();
    match path.extension() {
        Some(e) if e == ext => path.with_extension(""),
        _                   => path.to_path_buf(),
    }
}
