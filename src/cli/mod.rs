// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Parses the command line with clap and routes to a use case.
// All work is delegated to Layer 2 (application).
//
//   1. `train`    - two-stage training (optionally resumed)
//   2. `evaluate` - re-score the best checkpoints of a run

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

use crate::infra::metrics::MetricLog;

#[derive(Parser, Debug)]
#[command(
    name = "staged-trainer",
    version,
    about = "Train a feature network, then a classifier on its frozen features."
)]
pub struct Cli {
    /// 0 = warnings only, 1 = info, 2 = debug (per-batch progress).
    /// RUST_LOG takes precedence when set.
    #[arg(short, long, global = true, default_value_t = 1,
          value_parser = clap::value_parser!(u8).range(0..=2))]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log directive for the chosen verbosity.
    pub fn log_level(&self) -> &'static str {
        match self.verbosity {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }

    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => run_train(args),
            Commands::Evaluate(args) => run_evaluate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    let outcome = TrainUseCase::new(args.into()).execute()?;

    println!("Training complete. Run saved to '{}'.", outcome.run_dir.display());
    if let Some(log) = &outcome.report.classifier.test_log {
        print_log("Classifier", log);
    }
    Ok(())
}

fn run_evaluate(args: EvaluateArgs) -> Result<()> {
    use crate::application::evaluate_use_case::EvaluateUseCase;

    let report = EvaluateUseCase::new(args.run_dir, args.backend.into()).execute()?;

    print_log("Feature net", &report.feature_net);
    print_log("Classifier", &report.classifier);
    Ok(())
}

fn print_log(title: &str, log: &MetricLog) {
    println!("\n{title}:");
    for (key, value) in log.iter() {
        println!("    {:15}: {}", key, value);
    }
}
