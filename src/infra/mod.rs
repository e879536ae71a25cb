// ============================================================
// Layer 6 - Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the trainer and use cases:
//
//   checkpoint.rs - Model weights and optimizer state through
//                   Burn's CompactRecorder, JSON sidecars with
//                   epoch / monitored best / config, and the
//                   run's config.json.
//
//   metrics.rs    - Metric functions, the running tracker the
//                   trainer fills per epoch, and the per-model
//                   CSV log of every epoch.

/// Model / optimizer checkpoint saving and loading
pub mod checkpoint;

/// Metrics, trackers and the CSV logger
pub mod metrics;
