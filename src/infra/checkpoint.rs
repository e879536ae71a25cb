// ============================================================
// Layer 6 - Checkpoint Manager
// ============================================================
// Saves and restores model weights, optimizer state and the
// bookkeeping needed to resume or evaluate a run.
//
// Weights and optimizer state go through Burn's CompactRecorder
// (named MessagePack, half precision). Every weight file gets a
// JSON sidecar with the epoch, the monitored best value and the
// full config.
//
// File naming convention:
//   <run_dir>/
//     config.json                          ← effective config
//     featurenet_best.mpk / .json          ← best feature net
//     featurenet-checkpoint-epoch3.mpk     ← resumable snapshot
//     featurenet-checkpoint-epoch3.json
//     featurenet-checkpoint-epoch3-optim.mpk
//     classifier_best.mpk / .json
//     classifier-checkpoint-epoch5.*
//     test_outs_<fold>.json / test_trgs_<fold>.json
//                                          ← classifier test predictions
//                                            and targets
//
// Recorders append their own extension, so every path handed
// around here is an extension-less "stem".

use anyhow::{bail, Context, Result};
use burn::{
    module::Module,
    record::{CompactRecorder, FileRecorder, Record, Recorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::application::config::{ArchConfig, ExperimentConfig, OptimizerKind};

const CONFIG_FILE: &str = "config.json";
const META_EXT: &str = "json";
const OPTIM_SUFFIX: &str = "-optim";

/// Which of the two networks a checkpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    FeatureNet,
    Classifier,
}

impl ModelKind {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            ModelKind::FeatureNet => "featurenet",
            ModelKind::Classifier => "classifier",
        }
    }

    /// Type name stored as `arch` in the metadata.
    pub fn arch_name(&self) -> &'static str {
        match self {
            ModelKind::FeatureNet => "FeatureNet",
            ModelKind::Classifier => "Classifier",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

/// JSON sidecar stored next to every weight file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub kind:         ModelKind,
    pub arch:         String,
    pub epoch:        usize,
    /// `None` when the best value is not finite (monitor off or untouched).
    pub monitor_best: Option<f64>,
    /// Optimizer that produced the weights.
    pub optimizer:    OptimizerKind,
    pub config:       ExperimentConfig,
}

impl CheckpointMeta {
    pub fn new(
        kind:         ModelKind,
        epoch:        usize,
        monitor_best: f64,
        optimizer:    OptimizerKind,
        config:       &ExperimentConfig,
    ) -> Self {
        Self {
            kind,
            arch: kind.arch_name().to_string(),
            epoch,
            monitor_best: monitor_best.is_finite().then_some(monitor_best),
            optimizer,
            config: config.clone(),
        }
    }

    pub fn arch_config(&self) -> &ArchConfig {
        &self.config.arch
    }
}

/// A checkpoint picked for resuming: where it lives and what it says.
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub stem: PathBuf,
    pub meta: CheckpointMeta,
}

/// Manages every file in one run directory.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    /// Open an existing run directory without creating it.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            bail!("Run directory '{}' does not exist. Have you trained first?", dir.display());
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn best_stem(&self, kind: ModelKind) -> PathBuf {
        self.dir.join(format!("{}_best", kind.file_prefix()))
    }

    pub fn epoch_stem(&self, kind: ModelKind, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}-checkpoint-epoch{}", kind.file_prefix(), epoch))
    }

    // ─── Weights ──────────────────────────────────────────────────────────────

    /// Write model weights to `<stem>.mpk` and metadata to `<stem>.json`.
    pub fn save_model<B: Backend, M: Module<B>>(
        &self,
        stem:  &Path,
        model: &M,
        meta:  &CheckpointMeta,
    ) -> Result<()> {
        model
            .clone()
            .save_file(stem.to_path_buf(), &CompactRecorder::new())
            .with_context(|| format!("Failed to save checkpoint to '{}'", stem.display()))?;

        let meta_path = stem.with_extension(META_EXT);
        fs::write(&meta_path, serde_json::to_string_pretty(meta)?)
            .with_context(|| format!("Cannot write '{}'", meta_path.display()))?;

        tracing::debug!("Saved {} weights (epoch {}) to '{}'", meta.kind, meta.epoch, stem.display());
        Ok(())
    }

    /// Load weights from `<stem>.mpk` into `model`.
    /// The model must have the architecture the weights were saved with.
    pub fn load_model<B: Backend, M: Module<B>>(
        &self,
        stem:   &Path,
        model:  M,
        device: &B::Device,
    ) -> Result<M> {
        model
            .load_file(stem.to_path_buf(), &CompactRecorder::new(), device)
            .with_context(|| {
                format!("Cannot load checkpoint '{}'. Has this stage been trained?", stem.display())
            })
    }

    /// Read the JSON sidecar of `<stem>`.
    pub fn load_meta(&self, stem: &Path) -> Result<CheckpointMeta> {
        read_meta(stem)
    }

    // ─── Optimizer state ──────────────────────────────────────────────────────

    pub fn save_optimizer<B: AutodiffBackend, R: Record<B>>(
        &self,
        stem:   &Path,
        record: R,
    ) -> Result<()> {
        let path = optimizer_stem(stem);
        Recorder::<B>::record(&CompactRecorder::new(), record, path.clone())
            .with_context(|| format!("Failed to save optimizer state to '{}'", path.display()))?;
        Ok(())
    }

    /// `Ok(None)` when the checkpoint was saved without optimizer state.
    pub fn load_optimizer<B: AutodiffBackend, R: Record<B>>(
        &self,
        stem:   &Path,
        device: &B::Device,
    ) -> Result<Option<R>> {
        let path = optimizer_stem(stem);
        let ext = <CompactRecorder as FileRecorder<B>>::file_extension();
        if !path.with_extension(ext).exists() {
            return Ok(None);
        }
        let record = Recorder::<B>::load(&CompactRecorder::new(), path.clone(), device)
            .with_context(|| format!("Cannot load optimizer state '{}'", path.display()))?;
        Ok(Some(record))
    }

    // ─── Config ───────────────────────────────────────────────────────────────

    /// Save the effective configuration so the run can be evaluated later.
    pub fn save_config(&self, cfg: &ExperimentConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved experiment config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config(&self) -> Result<ExperimentConfig> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' first.",
                path.display()
            )
        })?;
        serde_json::from_str(&json)
            .with_context(|| format!("Malformed config in '{}'", path.display()))
    }

    // ─── Test outputs ─────────────────────────────────────────────────────────

    /// Write the classifier's test predictions and targets to
    /// `test_outs_<fold>.json` and `test_trgs_<fold>.json`.
    pub fn save_test_outputs(&self, fold: Option<usize>, preds: &[i64], targets: &[i64]) -> Result<()> {
        let (outs_path, trgs_path) = self.test_output_paths(fold);
        for (path, values) in [(&outs_path, preds), (&trgs_path, targets)] {
            fs::write(path, serde_json::to_string(values)?)
                .with_context(|| format!("Cannot write test outputs to '{}'", path.display()))?;
        }
        tracing::debug!("Saved {} test predictions to '{}'", preds.len(), outs_path.display());
        Ok(())
    }

    /// Predictions and targets written by [`Self::save_test_outputs`].
    pub fn load_test_outputs(&self, fold: Option<usize>) -> Result<(Vec<i64>, Vec<i64>)> {
        let (outs_path, trgs_path) = self.test_output_paths(fold);
        let read = |path: &Path| -> Result<Vec<i64>> {
            let json = fs::read_to_string(path)
                .with_context(|| format!("Cannot read test outputs '{}'", path.display()))?;
            serde_json::from_str(&json)
                .with_context(|| format!("Malformed test outputs in '{}'", path.display()))
        };
        Ok((read(&outs_path)?, read(&trgs_path)?))
    }

    fn test_output_paths(&self, fold: Option<usize>) -> (PathBuf, PathBuf) {
        let fold = fold.map_or_else(|| "all".to_string(), |f| f.to_string());
        (
            self.dir.join(format!("test_outs_{fold}.json")),
            self.dir.join(format!("test_trgs_{fold}.json")),
        )
    }

    // ─── Resume ───────────────────────────────────────────────────────────────

    /// Accepts a checkpoint stem or either of its files and reads its metadata.
    pub fn resolve_resume(path: &Path) -> Result<ResumePoint> {
        let stem = checkpoint_stem(path);
        let meta = read_meta(&stem)?;
        Ok(ResumePoint { stem, meta })
    }
}

fn read_meta(stem: &Path) -> Result<CheckpointMeta> {
    let path = stem.with_extension(META_EXT);
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Cannot read checkpoint metadata '{}'", path.display()))?;
    serde_json::from_str(&json)
        .with_context(|| format!("Malformed checkpoint metadata in '{}'", path.display()))
}

/// `dir/x-checkpoint-epoch3` → `dir/x-checkpoint-epoch3-optim`
fn optimizer_stem(stem: &Path) -> PathBuf {
    let name = stem
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.with_file_name(format!("{name}{OPTIM_SUFFIX}"))
}

/// Strip `.mpk.gz`, `.mpk` or `.json` off a user-supplied checkpoint path.
fn checkpoint_stem(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    for suffix in [".mpk.gz", ".mpk", ".json"] {
        if let Some(base) = name.strip_suffix(suffix) {
            return path.with_file_name(base);
        }
    }
    path.to_path_buf()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::ExperimentConfig;
    use crate::ml::model::{FeatureNet, FeatureNetConfig, LossWeights};
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::optim::{AdamConfig, GradientsParams, Optimizer};
    use burn::tensor::{Int, Tensor};

    type TestBackend = NdArray<f32>;
    type TestAutodiff = Autodiff<TestBackend>;

    fn tiny_net<B: Backend>(device: &B::Device) -> FeatureNet<B> {
        FeatureNetConfig::new(3, 4, 2, 2, 2).init(device)
    }

    #[test]
    fn test_stem_naming() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        assert!(mgr.best_stem(ModelKind::FeatureNet).ends_with("featurenet_best"));
        assert!(mgr
            .epoch_stem(ModelKind::Classifier, 7)
            .ends_with("classifier-checkpoint-epoch7"));
        assert!(optimizer_stem(&mgr.epoch_stem(ModelKind::FeatureNet, 2))
            .ends_with("featurenet-checkpoint-epoch2-optim"));
    }

    #[test]
    fn test_checkpoint_stem_accepts_any_companion_file() {
        let base = Path::new("runs/a/featurenet-checkpoint-epoch3");
        assert_eq!(checkpoint_stem(&base.with_extension("json")), base);
        assert_eq!(
            checkpoint_stem(Path::new("runs/a/featurenet-checkpoint-epoch3.mpk.gz")),
            base
        );
        assert_eq!(checkpoint_stem(base), base);
    }

    #[test]
    fn test_meta_stores_non_finite_best_as_null() {
        let cfg = ExperimentConfig::example();
        let meta = CheckpointMeta::new(ModelKind::FeatureNet, 1, f64::INFINITY, OptimizerKind::Adam, &cfg);
        assert_eq!(meta.monitor_best, None);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"monitor_best\":null"));

        let meta = CheckpointMeta::new(ModelKind::Classifier, 4, 0.25, OptimizerKind::Sgd, &cfg);
        assert_eq!(meta.monitor_best, Some(0.25));
        assert_eq!(meta.arch, "Classifier");
    }

    #[test]
    fn test_model_and_meta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let cfg = ExperimentConfig::example();

        let net = tiny_net::<TestBackend>(&device);
        let stem = mgr.best_stem(ModelKind::FeatureNet);
        let meta = CheckpointMeta::new(ModelKind::FeatureNet, 3, 0.5, OptimizerKind::Adam, &cfg);
        mgr.save_model(&stem, &net, &meta).unwrap();

        let loaded = mgr.load_model(&stem, tiny_net::<TestBackend>(&device), &device).unwrap();
        let x = Tensor::<TestBackend, 2>::from_floats([[0.1, 0.2, 0.3]], &device);
        let a = net.predict(x.clone()).into_data();
        let b = loaded.predict(x).into_data();
        a.assert_approx_eq(&b, 2);

        let point = CheckpointManager::resolve_resume(&stem.with_extension("json")).unwrap();
        assert_eq!(point.stem, stem);
        assert_eq!(point.meta.epoch, 3);
        assert_eq!(point.meta.monitor_best, Some(0.5));
    }

    #[test]
    fn test_load_meta_reads_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let cfg = ExperimentConfig::example();

        let stem = mgr.epoch_stem(ModelKind::Classifier, 4);
        let meta = CheckpointMeta::new(ModelKind::Classifier, 4, f64::NEG_INFINITY, OptimizerKind::Sgd, &cfg);
        mgr.save_model(&stem, &tiny_net::<TestBackend>(&device), &meta).unwrap();

        let read = mgr.load_meta(&stem).unwrap();
        assert_eq!(read.kind, ModelKind::Classifier);
        assert_eq!(read.epoch, 4);
        assert_eq!(read.monitor_best, None);
        assert_eq!(read.optimizer, OptimizerKind::Sgd);
        assert_eq!(read.arch_config(), &cfg.arch);

        assert!(mgr.load_meta(&mgr.best_stem(ModelKind::Classifier)).is_err());
    }

    #[test]
    fn test_test_outputs_are_written_per_fold() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();

        mgr.save_test_outputs(Some(2), &[1, 0, 1], &[1, 1, 1]).unwrap();
        assert!(dir.path().join("test_outs_2.json").exists());
        assert!(dir.path().join("test_trgs_2.json").exists());
        assert_eq!(mgr.load_test_outputs(Some(2)).unwrap(), (vec![1, 0, 1], vec![1, 1, 1]));

        mgr.save_test_outputs(None, &[], &[]).unwrap();
        assert!(dir.path().join("test_outs_all.json").exists());
        assert!(mgr.load_test_outputs(Some(0)).is_err());
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();
        let result = mgr.load_model(
            &mgr.best_stem(ModelKind::FeatureNet),
            tiny_net::<TestBackend>(&device),
            &device,
        );
        assert!(result.is_err());
        assert!(CheckpointManager::resolve_resume(&dir.path().join("nope")).is_err());
    }

    fn restore<O, M>(
        mgr:    &CheckpointManager,
        stem:   &Path,
        optim:  O,
        device: &<TestAutodiff as Backend>::Device,
    ) -> (O, bool)
    where
        O: Optimizer<M, TestAutodiff>,
        M: AutodiffModule<TestAutodiff>,
    {
        match mgr.load_optimizer::<TestAutodiff, O::Record>(stem, device).unwrap() {
            Some(record) => (optim.load_record(record), true),
            None => (optim, false),
        }
    }

    #[test]
    fn test_optimizer_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        let device = Default::default();

        let mut model = tiny_net::<TestAutodiff>(&device);
        let optim = AdamConfig::new().init::<TestAutodiff, FeatureNet<TestAutodiff>>();

        let stem = mgr.epoch_stem(ModelKind::FeatureNet, 1);
        let (mut optim, found) = restore(&mgr, &stem, optim, &device);
        assert!(!found);

        let x = Tensor::<TestAutodiff, 2>::from_floats([[0.1, 0.2, 0.3]], &device);
        let y = Tensor::<TestAutodiff, 1, Int>::from_ints([1], &device);
        let d = Tensor::<TestAutodiff, 1, Int>::from_ints([0], &device);
        let out = model.forward_loss(x, y, d, LossWeights::default());
        let grads = GradientsParams::from_grads(out.loss.backward(), &model);
        model = optim.step(1e-3, model, grads);

        mgr.save_optimizer::<TestAutodiff, _>(&stem, optim.to_record()).unwrap();
        let (_optim, found) = restore(&mgr, &stem, optim, &device);
        assert!(found);
        assert_eq!(model.num_params(), tiny_net::<TestBackend>(&device).num_params());
    }
}
