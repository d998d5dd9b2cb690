// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal per command (buffer, linear-eval, inspect).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Dataset loading and loader construction shared by the workflows
pub mod dataset_prep;

// Expert training and trajectory buffers
pub mod buffer_use_case;

// Linear probe on a trained backbone
pub mod linear_eval_use_case;

// Buffer file summary
pub mod inspect_use_case;
