// ============================================================
// Layer 2 - Application / Use Cases
// ============================================================
// Workflow coordination only: read the config, build the data
// pipeline and models on the chosen backend, hand off to the
// trainer. No tensor code and no clap types here.

// Experiment configuration file
pub mod config;

// Backend selection and dispatch
pub mod backend;

// The two-stage training workflow
pub mod train_use_case;

// Re-scoring a finished run on its test split
pub mod evaluate_use_case;
