// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// Networks, losses and optimisation loops. The data layer only
// touches burn's Dataset/Batcher seams; everything that builds
// or differentiates a model lives here.
//
//   backend.rs      — compile-time backend and device selection
//
//   model.rs        — MLP and ConvNet family
//                     • conv 3x3 → instance norm → relu → avg pool
//                     • features() / classify() sub-calls
//
//   loss.rs         — MSE, hard-label CE, soft-target CE
//
//   trainer.rs      — teacher training loop, one trajectory
//                     per expert, parameter snapshots per epoch
//
//   lbfgs.rs        — limited-memory BFGS on a flat vector
//
//   linear_probe.rs — feature extraction, L-BFGS linear
//                     classifier, accuracy and top-k helpers
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Nocedal & Wright (2006) Numerical Optimization §7.2

/// Backend aliases and device selection
pub mod backend;

/// ConvNet / MLP architectures
pub mod model;

/// Training criteria
pub mod loss;

/// Expert training loop and trajectory snapshots
pub mod trainer;

/// Quasi-Newton optimiser used by the linear probe
pub mod lbfgs;

/// Linear evaluation of frozen features
pub mod linear_probe;
