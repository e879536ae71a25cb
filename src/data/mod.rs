// ============================================================
// Layer 4 - Data Pipeline
// ============================================================
// Everything from the samples file to device-ready batches:
//
//   samples.jsonl
//       │
//       ▼
//   JsonlLoader       → parses one Sample per line
//       │
//       ▼
//   DataSplit         → held-out domain test set + seeded
//       │                train/validation split
//       ▼
//   DomainDataset     → implements Burn's Dataset trait
//       │
//       ▼
//   DomainBatcher     → stacks samples into x / y / d tensors
//       │
//       ▼
//   Loaders           → Burn DataLoaders for each split

/// Reads samples from a JSON Lines file
pub mod loader;

/// Implements Burn's Dataset trait for samples
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Builds the train / validation / test splits
pub mod splitter;

/// Wraps the splits in Burn DataLoaders
pub mod loaders;
