// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their flags. Anything given here overrides the config file.

use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::application::backend::BackendKind;
use crate::application::train_use_case::TrainRequest;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the feature network, then the classifier on its frozen features
    Train(TrainArgs),

    /// Score the best checkpoints of a finished run on its test split
    Evaluate(EvaluateArgs),
}

/// Compute backend. `wgpu` needs a build with `--features wgpu`.
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum BackendArg {
    #[default]
    Ndarray,
    Wgpu,
}

impl From<BackendArg> for BackendKind {
    fn from(b: BackendArg) -> Self {
        match b {
            BackendArg::Ndarray => BackendKind::NdArray,
            BackendArg::Wgpu    => BackendKind::Wgpu,
        }
    }
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Experiment config (JSON). Optional with --resume, which
    /// falls back to the config stored in the checkpoint.
    #[arg(short, long, required_unless_present = "resume")]
    pub config: Option<PathBuf>,

    /// Checkpoint to resume from, e.g. saved/exp/fold_0/featurenet-checkpoint-epoch3
    #[arg(short, long)]
    pub resume: Option<PathBuf>,

    /// Domain to hold out as the test split
    #[arg(long)]
    pub fold_id: Option<usize>,

    /// Epochs per stage
    #[arg(long)]
    pub epochs: Option<usize>,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    pub backend: BackendArg,
}

/// Convert CLI TrainArgs into the application-layer TrainRequest.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainRequest {
    fn from(a: TrainArgs) -> Self {
        TrainRequest {
            config:     a.config,
            resume:     a.resume,
            fold_id:    a.fold_id,
            epochs:     a.epochs,
            batch_size: a.batch_size,
            backend:    a.backend.into(),
        }
    }
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Run directory written by `train`, e.g. saved/exp/fold_0
    #[arg(long)]
    pub run_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendArg::Ndarray)]
    pub backend: BackendArg,
}
