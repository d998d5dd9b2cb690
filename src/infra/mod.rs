// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything that touches the output directory:
//
//   checkpoint.rs   — network weights via Burn's DefaultRecorder,
//                     per-epoch and final files per expert, plus
//                     JSON dumps of the run configuration
//
//   buffer_store.rs — pending trajectories flushed to numbered
//                     replay_buffer_{n}.bin files (bincode),
//                     never overwriting an earlier buffer
//
//   metrics.rs      — per-epoch loss rows in metrics.csv
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Network checkpoint saving and loading
pub mod checkpoint;

/// Trajectory buffer files
pub mod buffer_store;

/// Training metrics CSV logger
pub mod metrics;
