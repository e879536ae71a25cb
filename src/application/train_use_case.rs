// ============================================================
// Layer 2 - TrainUseCase
// ============================================================
// Orchestrates a full two-stage run in order:
//
//   Step 1: Resolve the effective config    (file / checkpoint + CLI)
//   Step 2: Load and check samples          (Layer 4 - data)
//   Step 3: Train / validation / test split (Layer 4 - data)
//   Step 4: Create run dir, save config     (Layer 6 - infra)
//   Step 5: Seed the backend, build models  (Layer 5 - ml)
//   Step 6: Build DataLoaders               (Layer 4 - data)
//   Step 7: Optional resume, then fit       (Layer 5 - ml)

use anyhow::{bail, Result};
use burn::{module::Module, prelude::*, tensor::backend::AutodiffBackend};
use std::path::PathBuf;

use crate::application::backend::{dispatch, BackendJob, BackendKind};
use crate::application::config::ExperimentConfig;
use crate::data::{
    loader::{validate_samples, JsonlLoader},
    loaders::Loaders,
    splitter::DataSplit,
};
use crate::domain::traits::SampleSource;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::{
    model::{ClassifierConfig, FeatureNetConfig},
    trainer::{PhaseReport, Trainer, TrainingReport},
};

// ─── Training Request ────────────────────────────────────────────────────────
// What the user asked for. Everything but `config`/`resume` is an
// override applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct TrainRequest {
    /// Experiment config file; may be omitted when resuming
    pub config:     Option<PathBuf>,
    /// Checkpoint to continue from
    pub resume:     Option<PathBuf>,
    pub fold_id:    Option<usize>,
    pub epochs:     Option<usize>,
    pub batch_size: Option<usize>,
    pub backend:    BackendKind,
}

/// Where the run was written and how it went.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub run_dir: PathBuf,
    pub report:  TrainingReport,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    request: TrainRequest,
}

impl TrainUseCase {
    pub fn new(request: TrainRequest) -> Self {
        Self { request }
    }

    /// Execute the full training pipeline end to end
    pub fn execute(&self) -> Result<TrainOutcome> {
        dispatch(self.request.backend, self)
    }

    /// Config file (or the config stored with the resumed checkpoint)
    /// with the command-line overrides applied.
    pub fn effective_config(&self) -> Result<ExperimentConfig> {
        let req = &self.request;
        let mut cfg = match (&req.config, &req.resume) {
            (Some(path), _) => ExperimentConfig::load(path)?,
            (None, Some(resume)) => {
                tracing::info!("No config given; using the one stored with '{}'", resume.display());
                CheckpointManager::resolve_resume(resume)?.meta.config
            }
            (None, None) => bail!("either a config file or a checkpoint to resume from is required"),
        };

        if let Some(fold) = req.fold_id {
            cfg.fold_id = Some(fold);
        }
        if let Some(epochs) = req.epochs {
            cfg.trainer.epochs = epochs;
        }
        if let Some(batch_size) = req.batch_size {
            cfg.data.batch_size = batch_size;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

impl BackendJob for &TrainUseCase {
    type Output = TrainOutcome;

    fn run<B: AutodiffBackend>(self) -> Result<TrainOutcome> {
        // ── Step 1: Effective config ──────────────────────────────────────────
        let cfg = self.effective_config()?;
        tracing::info!("Experiment '{}' (fold {:?})", cfg.name, cfg.fold_id);

        // ── Steps 2-3: Samples and splits ─────────────────────────────────────
        let split = load_split(&cfg)?;
        if split.train.is_empty() {
            bail!("training split is empty; check fold_id and validation_split");
        }

        // ── Step 4: Run directory + effective config ──────────────────────────
        let run_dir     = cfg.run_dir();
        let checkpoints = CheckpointManager::new(&run_dir)?;
        checkpoints.save_config(&cfg)?;

        // ── Step 5: Models ────────────────────────────────────────────────────
        B::seed(cfg.data.seed);
        let device      = B::Device::default();
        let feature_net = FeatureNetConfig::from_arch(&cfg.arch).init::<B>(&device);
        let classifier  = ClassifierConfig::from_arch(&cfg.arch).init::<B>(&device);
        tracing::info!(
            "FeatureNet: {} parameters, Classifier: {} parameters",
            feature_net.num_params(),
            classifier.num_params(),
        );

        // ── Step 6: DataLoaders ───────────────────────────────────────────────
        let loaders = Loaders::<B>::build(split, &cfg.data, &device);
        tracing::info!("{} batches per epoch", loaders.len_epoch());

        // ── Step 7: Train ─────────────────────────────────────────────────────
        let mut trainer = Trainer::new(cfg, feature_net, classifier, loaders, checkpoints, device)?;
        if let Some(path) = &self.request.resume {
            trainer.resume(path)?;
        }
        let report = trainer.fit()?;

        log_summary(&report);
        Ok(TrainOutcome { run_dir, report })
    }
}

/// Load, check and split the samples a config points at.
/// The same config always yields the same split.
pub fn load_split(cfg: &ExperimentConfig) -> Result<DataSplit> {
    let samples = JsonlLoader::new(&cfg.data.path).load_all()?;
    validate_samples(&samples, &cfg.arch)?;
    Ok(DataSplit::build(samples, cfg.fold_id, cfg.data.validation_split, cfg.data.seed))
}

fn log_summary(report: &TrainingReport) {
    for phase in [&report.feature_net, &report.classifier] {
        log_phase(phase);
    }
}

fn log_phase(phase: &PhaseReport) {
    if phase.skipped {
        tracing::info!("{}: skipped", phase.kind);
        return;
    }
    tracing::info!(
        "{}: {} epochs{}, best monitored value {:.6}",
        phase.kind,
        phase.last_epoch,
        if phase.stopped_early { " (stopped early)" } else { "" },
        phase.monitor_best,
    );
    if let Some(acc) = phase.test_log.as_ref().and_then(|log| log.get("test_accuracy")) {
        tracing::info!("{}: test accuracy {:.4}", phase.kind, acc);
    }
}
