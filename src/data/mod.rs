// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything from the raw dataset files to device-ready batches:
//
//   binary dataset files
//       │
//       ▼
//   DatasetLoader     → ImageSplit (train / test), pixels in [0, 1]
//       │
//       ▼
//   Preprocessor      → channel normalisation, optional ZCA
//       │
//       ▼
//   label files       → Targets (class indices or dense rows)
//       │
//       ▼
//   ImageDataset      → burn Dataset, optionally wrapped in a
//   SubsetDataset       distilled-index subset
//       │
//       ▼
//   ImageBatcher      → ImageBatch tensors (augmented when training)
//       │
//       ▼
//   DataLoader        → feeds batches to the training loop
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads MNIST-family IDX files and CIFAR binary batches
pub mod loader;

/// Channel normalisation and ZCA whitening
pub mod preprocessor;

/// burn Dataset implementations over in-memory splits
pub mod dataset;

/// Stacks items into tensor batches
pub mod batcher;

/// Host-side image augmentation strategies
pub mod augment;

/// Precomputed label files, distilled index files, class subsets
pub mod labels;
