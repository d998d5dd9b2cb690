// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types describing what the system works with:
// host-side parameter tensors, trajectories, image splits
// and training targets.
//
// Rules for this layer:
//   - NO file I/O
//   - burn types appear only at the conversion edges
//     (HostTensor::from_tensor) and in traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Host tensors, parameter snapshots and trajectories
pub mod trajectory;

// In-memory image splits and dataset metadata
pub mod image_split;

// Training targets: class indices or dense vectors
pub mod targets;

// Core abstractions (traits) that other layers implement
pub mod traits;
