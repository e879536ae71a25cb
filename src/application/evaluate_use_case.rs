// ============================================================
// Layer 2 - EvaluateUseCase
// ============================================================
// Re-scores a finished run without training:
//
//   1. Open the run directory and read its config.json
//   2. Rebuild exactly the split the run was trained on
//      (same samples, fold and seed)
//   3. Load featurenet_best / classifier_best and run both
//      test passes

use anyhow::{bail, Result};
use burn::{prelude::*, tensor::backend::AutodiffBackend};
use std::path::PathBuf;

use crate::application::backend::{dispatch, BackendJob, BackendKind};
use crate::application::train_use_case::load_split;
use crate::data::loaders::Loaders;
use crate::infra::checkpoint::CheckpointManager;
use crate::infra::metrics::MetricLog;
use crate::ml::{
    model::{ClassifierConfig, FeatureNetConfig},
    trainer::Trainer,
};

/// `val_`/`test_` metrics of both saved models.
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub feature_net: MetricLog,
    pub classifier:  MetricLog,
}

pub struct EvaluateUseCase {
    run_dir: PathBuf,
    backend: BackendKind,
}

impl EvaluateUseCase {
    pub fn new(run_dir: impl Into<PathBuf>, backend: BackendKind) -> Self {
        Self { run_dir: run_dir.into(), backend }
    }

    pub fn execute(&self) -> Result<EvaluationReport> {
        dispatch(self.backend, self)
    }
}

impl BackendJob for &EvaluateUseCase {
    type Output = EvaluationReport;

    fn run<B: AutodiffBackend>(self) -> Result<EvaluationReport> {
        let checkpoints = CheckpointManager::open(&self.run_dir)?;
        let cfg = checkpoints.load_config()?;
        tracing::info!("Evaluating '{}' from '{}'", cfg.name, self.run_dir.display());

        let split = load_split(&cfg)?;
        if split.test.is_empty() {
            bail!(
                "run '{}' has no test split; it was trained without a held-out fold",
                self.run_dir.display()
            );
        }

        let device      = B::Device::default();
        let feature_net = FeatureNetConfig::from_arch(&cfg.arch).init::<B>(&device);
        let classifier  = ClassifierConfig::from_arch(&cfg.arch).init::<B>(&device);
        let loaders     = Loaders::<B>::build(split, &cfg.data, &device);

        let mut trainer = Trainer::new(cfg, feature_net, classifier, loaders, checkpoints, device)?;
        let feature_net = trainer.test_feature_net()?.unwrap_or_default();
        let classifier  = trainer.test_classifier()?.unwrap_or_default();

        Ok(EvaluationReport { feature_net, classifier })
    }
}
