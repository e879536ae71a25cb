// ============================================================
// Layer 5 - ML / Model Layer (Burn)
// ============================================================
// Networks, the two-stage training loop and the evaluation
// passes. Everything that builds a graph or steps an optimizer
// lives here.
//
//   model.rs     - FeatureNet (encoder + class head + domain
//                  head) and the Classifier head trained on
//                  its frozen latent features
//
//   trainer.rs   - Both training stages: epoch loop, monitor
//                  verdicts, best/snapshot checkpoints, resume
//                  and the final test passes
//
//   evaluator.rs - No-grad validation/test passes on the
//                  inner backend

/// Feature network and classifier architectures
pub mod model;

/// Two-stage training loop with checkpointing and resume
pub mod trainer;

/// Validation and test passes
pub mod evaluator;
