// ============================================================
// Layer 5 - Two-Stage Training Loop
// ============================================================
// Stage 1 trains the FeatureNet, stage 2 freezes the best
// FeatureNet found in stage 1 and trains a Classifier on its
// latent features. Both stages share the same epoch loop:
//
//   train one epoch → validate → log → monitor verdict →
//   keep best parameters → periodic snapshot → maybe stop
//
// and both end by writing `<kind>_best` plus a resumable
// snapshot, then scoring the best checkpoint on the test split.
//
// Key Burn insight:
//   - Training uses the autodiff backend B
//   - model.valid() returns the model on B::InnerBackend
//   - Validation/test loaders therefore batch on B::InnerBackend
//   - The frozen FeatureNet lives on B::InnerBackend too; its
//     features are lifted back with Tensor::from_inner so no
//     gradient ever reaches it

use anyhow::Result;
use burn::{
    module::{AutodiffModule, Module},
    optim::{
        decay::WeightDecayConfig, AdamConfig, AdamWConfig, GradientsParams, Optimizer, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use std::path::{Path, PathBuf};

use crate::application::config::{ExperimentConfig, OptimizerConfig, OptimizerKind};
use crate::data::loaders::Loaders;
use crate::domain::monitor::{Monitor, Verdict};
use crate::infra::checkpoint::{CheckpointManager, CheckpointMeta, ModelKind};
use crate::infra::metrics::{Metric, MetricLog, MetricTracker, MetricsLogger};
use crate::ml::evaluator::{
    apply_metrics, argmax_labels, classifier_outputs, evaluate_classifier, evaluate_feature_net,
    int_values,
};
use crate::ml::model::{Classifier, FeatureNet, LossWeights};

/// Outcome of one stage.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub kind:          ModelKind,
    /// Last epoch that was trained (0 when the stage was skipped)
    pub last_epoch:    usize,
    pub stopped_early: bool,
    pub monitor_best:  f64,
    /// val_/test_ metrics of the best checkpoint, when a test split exists
    pub test_log:      Option<MetricLog>,
    pub skipped:       bool,
}

impl PhaseReport {
    fn skipped(kind: ModelKind) -> Self {
        Self {
            kind,
            last_epoch:    0,
            stopped_early: false,
            monitor_best:  f64::NAN,
            test_log:      None,
            skipped:       true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub feature_net: PhaseReport,
    pub classifier:  PhaseReport,
}

/// Where a resumed stage picks up.
#[derive(Debug, Clone)]
struct Resumed {
    kind:         ModelKind,
    stem:         PathBuf,
    start_epoch:  usize,
    monitor_best: Option<f64>,
    optimizer:    OptimizerKind,
}

pub struct Trainer<B: AutodiffBackend> {
    config:        ExperimentConfig,
    device:        B::Device,
    feature_net:   FeatureNet<B>,
    classifier:    Classifier<B>,
    loaders:       Loaders<B>,
    checkpoints:   CheckpointManager,
    monitor:       Monitor,
    train_metrics: MetricTracker,
    valid_metrics: MetricTracker,
    test_metrics:  MetricTracker,
    /// Debug-log every `log_step` batches
    log_step:      usize,
    resumed:       Option<Resumed>,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        config:      ExperimentConfig,
        feature_net: FeatureNet<B>,
        classifier:  Classifier<B>,
        loaders:     Loaders<B>,
        checkpoints: CheckpointManager,
        device:      B::Device,
    ) -> Result<Self> {
        let monitor  = config.monitor()?;
        let tracker  = MetricTracker::for_metrics(&config.metrics);
        let log_step = loaders.batch_size.max(1);

        Ok(Self {
            config,
            device,
            feature_net,
            classifier,
            loaders,
            checkpoints,
            monitor,
            train_metrics: tracker.clone(),
            valid_metrics: tracker.clone(),
            test_metrics:  tracker,
            log_step,
            resumed: None,
        })
    }

    /// Load a snapshot written by a previous run and continue from it.
    ///
    /// Weights are loaded right away; optimizer state is restored when
    /// the matching stage starts, and only if the optimizer type is the
    /// one the snapshot was trained with.
    pub fn resume(&mut self, path: &Path) -> Result<()> {
        tracing::info!("Loading checkpoint: {} ...", path.display());
        let point = CheckpointManager::resolve_resume(path)?;
        let meta  = &point.meta;

        if meta.arch_config() != &self.config.arch {
            tracing::warn!(
                "Warning: Architecture configuration given in config file is different from that of \
                 checkpoint. This may yield an exception while state_dict is being loaded."
            );
        }

        match meta.kind {
            ModelKind::FeatureNet => {
                self.feature_net = self.checkpoints.load_model::<B, _>(
                    &point.stem,
                    self.feature_net.clone(),
                    &self.device,
                )?;
            }
            ModelKind::Classifier => {
                self.classifier = self.checkpoints.load_model::<B, _>(
                    &point.stem,
                    self.classifier.clone(),
                    &self.device,
                )?;
            }
        }

        let start_epoch = meta.epoch + 1;
        self.resumed = Some(Resumed {
            kind:         meta.kind,
            stem:         point.stem.clone(),
            start_epoch,
            monitor_best: meta.monitor_best,
            optimizer:    meta.optimizer,
        });

        tracing::info!("Checkpoint loaded. Resume training from epoch {}", start_epoch);
        Ok(())
    }

    /// Run both stages.
    pub fn fit(&mut self) -> Result<TrainingReport> {
        let resuming_classifier = self
            .resumed
            .as_ref()
            .is_some_and(|r| r.kind == ModelKind::Classifier);

        let feature_net = if resuming_classifier {
            tracing::info!("Resuming the classifier stage; feature net training is skipped");
            PhaseReport::skipped(ModelKind::FeatureNet)
        } else {
            self.train_feature_net()?
        };
        let classifier = self.train_classifier()?;

        Ok(TrainingReport { feature_net, classifier })
    }

    // ─── Stage 1: feature network ─────────────────────────────────────────────

    pub fn train_feature_net(&mut self) -> Result<PhaseReport> {
        let opt = self.config.optimizer.clone();
        let mut report = match opt.kind {
            OptimizerKind::Adam => self.feature_net_loop(
                AdamConfig::new()
                    .with_weight_decay(weight_decay(&opt))
                    .init::<B, FeatureNet<B>>(),
                &opt,
            )?,
            OptimizerKind::AdamW => self.feature_net_loop(
                AdamWConfig::new()
                    .with_weight_decay(opt.weight_decay as f32)
                    .init::<B, FeatureNet<B>>(),
                &opt,
            )?,
            OptimizerKind::Sgd => self.feature_net_loop(
                SgdConfig::new()
                    .with_weight_decay(weight_decay(&opt))
                    .init::<B, FeatureNet<B>>(),
                &opt,
            )?,
        };

        report.test_log = self.test_feature_net()?;
        Ok(report)
    }

    fn feature_net_loop<O>(&mut self, optim: O, opt: &OptimizerConfig) -> Result<PhaseReport>
    where
        O: Optimizer<FeatureNet<B>, B>,
    {
        let kind = ModelKind::FeatureNet;
        let (start_epoch, mut optim) = self.prepare_phase::<FeatureNet<B>, O>(kind, optim, opt.kind)?;
        let csv = MetricsLogger::new(self.checkpoints.dir(), kind)?;
        if start_epoch == 1 {
            csv.restart()?;
        }
        let hp  = self.config.hyper_params.clone();

        let mut model = self.feature_net.clone();
        let mut best  = (start_epoch > 1).then(|| self.existing_best(kind, model.clone()));
        let mut last_epoch    = start_epoch - 1;
        let mut stopped_early = false;

        for epoch in start_epoch..=self.config.trainer.epochs {
            let weights = LossWeights::warmed_up(hp.beta_y, hp.beta_d, hp.warmup, epoch);
            let (next, mut log) =
                self.train_feature_net_epoch(model, &mut optim, epoch, weights, opt.lr);
            model = next;

            if let Some(valid) = &self.loaders.valid {
                let val_log = evaluate_feature_net(
                    &model.valid(),
                    valid.as_ref(),
                    &self.config.metrics,
                    &mut self.valid_metrics,
                );
                log.extend_prefixed("val_", &val_log);
            }

            last_epoch = epoch;
            match self.record_epoch(epoch, &log, &csv)? {
                Verdict::Improved | Verdict::Untracked => best = Some(model.clone()),
                Verdict::NotImproved => {}
                Verdict::Stop => stopped_early = true,
            }
            if stopped_early {
                self.log_early_stop();
                break;
            }
            if epoch % self.config.trainer.save_period == 0 && epoch != self.config.trainer.epochs {
                self.save_snapshot(kind, epoch, &model, &optim, opt.kind)?;
            }
        }

        self.save_best(kind, last_epoch, best.as_ref().unwrap_or(&model), opt.kind)?;
        self.save_snapshot(kind, last_epoch, &model, &optim, opt.kind)?;
        self.feature_net = model;

        Ok(self.phase_report(kind, last_epoch, stopped_early))
    }

    fn train_feature_net_epoch<O>(
        &mut self,
        mut model: FeatureNet<B>,
        optim:     &mut O,
        epoch:     usize,
        weights:   LossWeights,
        lr:        f64,
    ) -> (FeatureNet<B>, MetricLog)
    where
        O: Optimizer<FeatureNet<B>, B>,
    {
        self.train_metrics.reset();
        let loader = self.loaders.train.clone();
        let mut preds   = Vec::new();
        let mut targets = Vec::new();

        for (batch_idx, batch) in loader.iter().enumerate() {
            let out = model.forward_loss(batch.x, batch.y.clone(), batch.d, weights);
            let total_loss: f64 = out.loss.clone().into_scalar().elem::<f64>();
            let class_loss: f64 = out.class_loss.into_scalar().elem::<f64>();
            preds.extend(argmax_labels(out.logits));
            targets.extend(int_values(batch.y));

            // Backward pass + optimizer update
            let grads = GradientsParams::from_grads(out.loss.backward(), &model);
            model = optim.step(lr, model, grads);

            self.train_metrics.update("loss", class_loss, 1);

            if batch_idx % self.log_step == 0 {
                tracing::debug!(
                    "Train Epoch: {} {} Loss: {:.6} ClassLoss: {:.6}",
                    epoch,
                    self.progress(batch_idx),
                    total_loss,
                    class_loss,
                );
            }
        }

        apply_metrics(&mut self.train_metrics, &self.config.metrics, &preds, &targets);
        (model, self.train_metrics.result())
    }

    /// Score the best feature net on validation and test data.
    /// `Ok(None)` when there is no test split.
    pub fn test_feature_net(&mut self) -> Result<Option<MetricLog>> {
        let Some(test) = self.loaders.test.clone() else {
            return Ok(None);
        };

        let stem  = self.checkpoints.best_stem(ModelKind::FeatureNet);
        let model = self
            .checkpoints
            .load_model::<B, _>(&stem, self.feature_net.clone(), &self.device)?
            .valid();

        let mut log = MetricLog::new();
        if let Some(valid) = &self.loaders.valid {
            let val_log =
                evaluate_feature_net(&model, valid.as_ref(), &self.config.metrics, &mut self.valid_metrics);
            log.extend_prefixed("val_", &val_log);
        }
        let test_log =
            evaluate_feature_net(&model, test.as_ref(), &self.config.metrics, &mut self.test_metrics);
        log.extend_prefixed("test_", &test_log);

        tracing::info!("{}", "=".repeat(100));
        tracing::info!("Representation learning is completed");
        tracing::info!("{}", "-".repeat(100));
        log.log_entries();
        Ok(Some(log))
    }

    // ─── Stage 2: classifier on frozen features ───────────────────────────────

    pub fn train_classifier(&mut self) -> Result<PhaseReport> {
        tracing::info!("{}", "=".repeat(100));
        tracing::info!("Start training Classification Net!");

        let stem = self.checkpoints.best_stem(ModelKind::FeatureNet);
        self.feature_net =
            self.checkpoints
                .load_model::<B, _>(&stem, self.feature_net.clone(), &self.device)?;

        tracing::info!("{}", "-".repeat(100));

        let opt = self.config.classifier_optimizer().clone();
        let mut report = match opt.kind {
            OptimizerKind::Adam => self.classifier_loop(
                AdamConfig::new()
                    .with_weight_decay(weight_decay(&opt))
                    .init::<B, Classifier<B>>(),
                &opt,
            )?,
            OptimizerKind::AdamW => self.classifier_loop(
                AdamWConfig::new()
                    .with_weight_decay(opt.weight_decay as f32)
                    .init::<B, Classifier<B>>(),
                &opt,
            )?,
            OptimizerKind::Sgd => self.classifier_loop(
                SgdConfig::new()
                    .with_weight_decay(weight_decay(&opt))
                    .init::<B, Classifier<B>>(),
                &opt,
            )?,
        };

        report.test_log = self.test_classifier()?;
        Ok(report)
    }

    fn classifier_loop<O>(&mut self, optim: O, opt: &OptimizerConfig) -> Result<PhaseReport>
    where
        O: Optimizer<Classifier<B>, B>,
    {
        let kind = ModelKind::Classifier;
        let (start_epoch, mut optim) = self.prepare_phase::<Classifier<B>, O>(kind, optim, opt.kind)?;
        let csv = MetricsLogger::new(self.checkpoints.dir(), kind)?;
        if start_epoch == 1 {
            csv.restart()?;
        }

        // Inference-mode copy: dropout off, no autodiff graph
        let frozen = self.feature_net.valid();

        let mut model = self.classifier.clone();
        let mut best  = (start_epoch > 1).then(|| self.existing_best(kind, model.clone()));
        let mut last_epoch    = start_epoch - 1;
        let mut stopped_early = false;

        for epoch in start_epoch..=self.config.trainer.epochs {
            let lr = self.classifier_lr(epoch, opt.lr);
            let (next, mut log) = self.train_classifier_epoch(&frozen, model, &mut optim, epoch, lr);
            model = next;

            if let Some(valid) = &self.loaders.valid {
                let val_log = evaluate_classifier(
                    &frozen,
                    &model.valid(),
                    valid.as_ref(),
                    &self.config.metrics,
                    &mut self.valid_metrics,
                );
                log.extend_prefixed("val_", &val_log);
            }

            last_epoch = epoch;
            match self.record_epoch(epoch, &log, &csv)? {
                Verdict::Improved | Verdict::Untracked => best = Some(model.clone()),
                Verdict::NotImproved => {}
                Verdict::Stop => stopped_early = true,
            }
            if stopped_early {
                self.log_early_stop();
                break;
            }
            if epoch % self.config.trainer.save_period == 0 && epoch != self.config.trainer.epochs {
                self.save_snapshot(kind, epoch, &model, &optim, opt.kind)?;
            }
        }

        self.save_best(kind, last_epoch, best.as_ref().unwrap_or(&model), opt.kind)?;
        self.save_snapshot(kind, last_epoch, &model, &optim, opt.kind)?;
        self.classifier = model;

        Ok(self.phase_report(kind, last_epoch, stopped_early))
    }

    fn train_classifier_epoch<O>(
        &mut self,
        frozen:    &FeatureNet<B::InnerBackend>,
        mut model: Classifier<B>,
        optim:     &mut O,
        epoch:     usize,
        lr:        f64,
    ) -> (Classifier<B>, MetricLog)
    where
        O: Optimizer<Classifier<B>, B>,
    {
        self.train_metrics.reset();
        let loader = self.loaders.train.clone();
        let mut preds   = Vec::new();
        let mut targets = Vec::new();

        for (batch_idx, batch) in loader.iter().enumerate() {
            let features = Tensor::<B, 2>::from_inner(frozen.features(batch.x.inner()));
            let (loss, logits) = model.forward_loss(features, batch.y.clone());
            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();

            let batch_preds   = argmax_labels(logits);
            let batch_targets = int_values(batch.y);

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);

            self.train_metrics.update("loss", loss_val, 1);

            if batch_idx % self.log_step == 0 {
                tracing::debug!(
                    "Train Epoch: {} {} Loss: {:.6} Accuracy: {:.6}",
                    epoch,
                    self.progress(batch_idx),
                    loss_val,
                    Metric::Accuracy.compute(&batch_preds, &batch_targets),
                );
            }

            preds.extend(batch_preds);
            targets.extend(batch_targets);
        }

        apply_metrics(&mut self.train_metrics, &self.config.metrics, &preds, &targets);
        (model, self.train_metrics.result())
    }

    /// Score the best feature net + best classifier on validation and test data
    /// and keep the test predictions next to the checkpoints.
    /// `Ok(None)` when there is no test split.
    pub fn test_classifier(&mut self) -> Result<Option<MetricLog>> {
        let Some(test) = self.loaders.test.clone() else {
            return Ok(None);
        };

        let feature_net = self
            .checkpoints
            .load_model::<B, _>(
                &self.checkpoints.best_stem(ModelKind::FeatureNet),
                self.feature_net.clone(),
                &self.device,
            )?
            .valid();
        let classifier = self
            .checkpoints
            .load_model::<B, _>(
                &self.checkpoints.best_stem(ModelKind::Classifier),
                self.classifier.clone(),
                &self.device,
            )?
            .valid();

        let mut log = MetricLog::new();
        if let Some(valid) = &self.loaders.valid {
            let val_log = evaluate_classifier(
                &feature_net,
                &classifier,
                valid.as_ref(),
                &self.config.metrics,
                &mut self.valid_metrics,
            );
            log.extend_prefixed("val_", &val_log);
        }
        let outs = classifier_outputs(
            &feature_net,
            &classifier,
            test.as_ref(),
            &self.config.metrics,
            &mut self.test_metrics,
        );
        log.extend_prefixed("test_", &outs.log);
        self.checkpoints
            .save_test_outputs(self.config.fold_id, &outs.preds, &outs.targets)?;

        tracing::info!("{}", "=".repeat(100));
        tracing::info!("Test is completed");
        tracing::info!("{}", "-".repeat(100));
        log.log_entries();
        Ok(Some(log))
    }

    /// Base rate, or the configured drop once its epoch has been trained.
    fn classifier_lr(&self, epoch: usize, base: f64) -> f64 {
        match &self.config.trainer.lr_drop {
            Some(drop) if epoch > drop.epoch => {
                if epoch == drop.epoch + 1 {
                    tracing::info!("Learning rate lowered to {}", drop.lr);
                }
                drop.lr
            }
            _ => base,
        }
    }

    // ─── Shared epoch bookkeeping ─────────────────────────────────────────────

    /// Reset the monitor for a new stage and apply a pending resume.
    /// Returns the first epoch to train and the (possibly restored) optimizer.
    fn prepare_phase<M, O>(&mut self, kind: ModelKind, optim: O, opt_kind: OptimizerKind) -> Result<(usize, O)>
    where
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        self.monitor.reset();

        let resumed = match self.resumed.take() {
            Some(r) if r.kind == kind => r,
            other => {
                self.resumed = other;
                return Ok((1, optim));
            }
        };

        if let Some(best) = resumed.monitor_best {
            self.monitor.restore_best(best);
        }

        let optim = if resumed.optimizer != opt_kind {
            tracing::warn!(
                "Warning: Optimizer type given in config file is different from that of checkpoint. \
                 Optimizer parameters not being resumed."
            );
            optim
        } else {
            match self.checkpoints.load_optimizer::<B, O::Record>(&resumed.stem, &self.device)? {
                Some(record) => optim.load_record(record),
                None => {
                    tracing::warn!(
                        "No optimizer state next to '{}'; optimizer starts fresh",
                        resumed.stem.display()
                    );
                    optim
                }
            }
        };

        Ok((resumed.start_epoch, optim))
    }

    /// The best weights a resumed stage starts from: `<kind>_best` when it
    /// exists and loads, otherwise the resumed weights themselves.
    fn existing_best<M: Module<B>>(&self, kind: ModelKind, resumed: M) -> M {
        let stem = self.checkpoints.best_stem(kind);
        match self.checkpoints.load_meta(&stem) {
            Ok(meta) if meta.kind == kind => {}
            Ok(meta) => {
                tracing::warn!("'{}' holds a {} checkpoint; ignoring it", stem.display(), meta.kind);
                return resumed;
            }
            Err(_) => return resumed,
        }
        match self.checkpoints.load_model::<B, M>(&stem, resumed.clone(), &self.device) {
            Ok(best) => best,
            Err(err) => {
                tracing::warn!("Ignoring unreadable '{}': {err:#}", stem.display());
                resumed
            }
        }
    }

    /// Print the epoch log, append it to the CSV and ask the monitor.
    fn record_epoch(&mut self, epoch: usize, log: &MetricLog, csv: &MetricsLogger) -> Result<Verdict> {
        tracing::info!("    {:15}: {}", "epoch", epoch);
        log.log_entries();
        csv.log(epoch, log)?;

        let value = log.get(self.monitor.metric());
        Ok(self.monitor.observe(value))
    }

    fn log_early_stop(&self) {
        tracing::info!(
            "Validation performance didn't improve for {} epochs. Training stops.",
            self.monitor.early_stop().unwrap_or_default()
        );
    }

    fn save_best<M: Module<B>>(
        &self,
        kind:     ModelKind,
        epoch:    usize,
        model:    &M,
        opt_kind: OptimizerKind,
    ) -> Result<()> {
        let meta = CheckpointMeta::new(kind, epoch, self.monitor.best(), opt_kind, &self.config);
        self.checkpoints
            .save_model::<B, M>(&self.checkpoints.best_stem(kind), model, &meta)?;
        tracing::info!("Saving current best: {}_best ...", kind.file_prefix());
        Ok(())
    }

    /// Current weights plus optimizer state, enough to resume from.
    fn save_snapshot<M, O>(
        &self,
        kind:     ModelKind,
        epoch:    usize,
        model:    &M,
        optim:    &O,
        opt_kind: OptimizerKind,
    ) -> Result<()>
    where
        M: AutodiffModule<B>,
        O: Optimizer<M, B>,
    {
        let stem = self.checkpoints.epoch_stem(kind, epoch);
        let meta = CheckpointMeta::new(kind, epoch, self.monitor.best(), opt_kind, &self.config);
        self.checkpoints.save_model::<B, M>(&stem, model, &meta)?;
        self.checkpoints.save_optimizer::<B, O::Record>(&stem, optim.to_record())?;
        tracing::info!("Saving checkpoint: {} ...", stem.display());
        Ok(())
    }

    fn phase_report(&self, kind: ModelKind, last_epoch: usize, stopped_early: bool) -> PhaseReport {
        PhaseReport {
            kind,
            last_epoch,
            stopped_early,
            monitor_best: self.monitor.best(),
            test_log: None,
            skipped: false,
        }
    }

    /// `[current/total (pct%)]` in samples.
    fn progress(&self, batch_idx: usize) -> String {
        let total   = self.loaders.train_samples;
        let current = (batch_idx * self.loaders.batch_size).min(total);
        let pct     = if total > 0 { 100.0 * current as f64 / total as f64 } else { 0.0 };
        format!("[{}/{} ({:.0}%)]", current, total, pct)
    }
}

fn weight_decay(opt: &OptimizerConfig) -> Option<WeightDecayConfig> {
    (opt.weight_decay > 0.0).then(|| WeightDecayConfig { penalty: opt.weight_decay as f32 })
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::config::LrDrop;
    use crate::data::splitter::DataSplit;
    use crate::domain::sample::Sample;
    use crate::ml::model::{ClassifierConfig, FeatureNetConfig};
    use burn::backend::{Autodiff, NdArray};
    use burn::record::{CompactRecorder, FileRecorder};
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    type TestBackend = Autodiff<NdArray<f32>>;
    type Inner = NdArray<f32>;

    /// Two separable classes spread over two domains.
    fn samples() -> Vec<Sample> {
        (0..48)
            .map(|i| {
                let label  = i % 2;
                let domain = (i / 2) % 2;
                let sign   = if label == 1 { 1.0 } else { -1.0 };
                Sample::new(
                    vec![sign, sign * 0.5, domain as f32, (i % 5) as f32 / 5.0],
                    label,
                    domain,
                )
            })
            .collect()
    }

    fn config(dir: &Path) -> ExperimentConfig {
        let mut cfg = ExperimentConfig::example();
        cfg.fold_id = Some(1);
        cfg.trainer.save_dir = dir.to_path_buf();
        cfg
    }

    fn trainer(cfg: ExperimentConfig) -> Trainer<TestBackend> {
        let device = <TestBackend as Backend>::Device::default();
        let split = DataSplit::build(samples(), cfg.fold_id, cfg.data.validation_split, cfg.data.seed);
        let loaders = Loaders::<TestBackend>::build(split, &cfg.data, &device);
        let checkpoints = CheckpointManager::new(cfg.run_dir()).unwrap();
        let feature_net = FeatureNetConfig::from_arch(&cfg.arch).init(&device);
        let classifier = ClassifierConfig::from_arch(&cfg.arch).init(&device);
        Trainer::new(cfg, feature_net, classifier, loaders, checkpoints, device).unwrap()
    }

    /// FeatureNet logits of two fixed rows, using the weights stored at `stem`.
    fn feature_net_logits(cfg: &ExperimentConfig, stem: &str) -> Vec<f32> {
        let device = Default::default();
        let mgr = CheckpointManager::open(cfg.run_dir()).unwrap();
        let net = FeatureNetConfig::from_arch(&cfg.arch).init::<Inner>(&device);
        let net = mgr.load_model::<Inner, _>(&cfg.run_dir().join(stem), net, &device).unwrap();
        let x = Tensor::<Inner, 2>::from_floats([[1.0, 0.5, 0.0, 0.2], [-1.0, -0.5, 1.0, 0.8]], &device);
        net.predict(x).into_data().iter::<f32>().collect()
    }

    /// Classifier logits on top of `featurenet_best` for the same two rows.
    fn classifier_logits(cfg: &ExperimentConfig, stem: &str) -> Vec<f32> {
        let device = Default::default();
        let mgr = CheckpointManager::open(cfg.run_dir()).unwrap();
        let net = FeatureNetConfig::from_arch(&cfg.arch).init::<Inner>(&device);
        let net = mgr
            .load_model::<Inner, _>(&mgr.best_stem(ModelKind::FeatureNet), net, &device)
            .unwrap();
        let clf = ClassifierConfig::from_arch(&cfg.arch).init::<Inner>(&device);
        let clf = mgr.load_model::<Inner, _>(&cfg.run_dir().join(stem), clf, &device).unwrap();
        let x = Tensor::<Inner, 2>::from_floats([[1.0, 0.5, 0.0, 0.2], [-1.0, -0.5, 1.0, 0.8]], &device);
        clf.forward(net.features(x)).into_data().iter::<f32>().collect()
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        assert_eq!(a.len(), b.len());
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    /// Formatted log output of everything traced on this thread.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = LogBuffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_two_stage_fit_writes_checkpoints_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let run_dir = cfg.run_dir();

        let report = trainer(cfg).fit().unwrap();

        assert!(!report.feature_net.skipped);
        assert_eq!(report.feature_net.last_epoch, 2);
        assert_eq!(report.classifier.last_epoch, 2);
        assert!(!report.feature_net.stopped_early);
        assert!(report.feature_net.monitor_best.is_finite());

        let test_log = report.classifier.test_log.unwrap();
        assert!(test_log.get("val_loss").is_some());
        assert!(test_log.get("test_loss").unwrap().is_finite());
        let acc = test_log.get("test_accuracy").unwrap();
        assert!((0.0..=1.0).contains(&acc));
        assert!(report.feature_net.test_log.unwrap().get("test_macro_f1").is_some());

        for stem in [
            "featurenet_best",
            "featurenet-checkpoint-epoch1",
            "featurenet-checkpoint-epoch2",
            "classifier_best",
            "classifier-checkpoint-epoch2",
        ] {
            assert!(run_dir.join(format!("{stem}.json")).exists(), "missing {stem}.json");
        }
        let ext = <CompactRecorder as FileRecorder<TestBackend>>::file_extension();
        assert!(run_dir.join(format!("featurenet-checkpoint-epoch2-optim.{ext}")).exists());

        let csv = std::fs::read_to_string(run_dir.join("featurenet_metrics.csv")).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("epoch,loss,accuracy,macro_f1,val_loss"));
    }

    #[test]
    fn test_early_stop_when_metric_cannot_improve() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.trainer.epochs = 5;
        cfg.trainer.monitor = "max val_accuracy".to_string();
        cfg.trainer.early_stop = Some(0);
        // Steps this small never flip a prediction
        cfg.optimizer = OptimizerConfig { kind: OptimizerKind::Sgd, lr: 1e-12, weight_decay: 0.0 };

        let report = trainer(cfg).fit().unwrap();

        assert!(report.feature_net.stopped_early);
        assert_eq!(report.feature_net.last_epoch, 2);
        assert!(report.classifier.stopped_early);
        assert_eq!(report.classifier.last_epoch, 2);
    }

    #[test]
    fn test_resume_continues_from_next_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let run_dir = cfg.run_dir();
        trainer(cfg.clone()).fit().unwrap();

        let mut longer = cfg.clone();
        longer.trainer.epochs = 3;
        let mut t = trainer(longer.clone());
        t.resume(&run_dir.join("featurenet-checkpoint-epoch2.json")).unwrap();
        let report = t.fit().unwrap();
        assert!(!report.feature_net.skipped);
        assert_eq!(report.feature_net.last_epoch, 3);
        assert_eq!(report.classifier.last_epoch, 3);
        assert!(run_dir.join("featurenet-checkpoint-epoch3.json").exists());

        // A classifier checkpoint skips the first stage entirely
        let mut t = trainer(longer);
        t.resume(&run_dir.join("classifier-checkpoint-epoch2")).unwrap();
        let report = t.fit().unwrap();
        assert!(report.feature_net.skipped);
        assert_eq!(report.classifier.last_epoch, 3);
    }

    #[test]
    fn test_resume_with_other_optimizer_still_trains() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let run_dir = cfg.run_dir();
        trainer(cfg.clone()).fit().unwrap();

        let mut changed = cfg;
        changed.trainer.epochs = 3;
        changed.optimizer.kind = OptimizerKind::AdamW;
        let mut t = trainer(changed);
        t.resume(&run_dir.join("featurenet-checkpoint-epoch2")).unwrap();
        assert_eq!(t.fit().unwrap().feature_net.last_epoch, 3);
    }

    #[test]
    fn test_resume_from_missing_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = trainer(config(dir.path()));
        assert!(t.resume(&dir.path().join("nope-checkpoint-epoch1")).is_err());
    }

    #[test]
    fn test_classifier_lr_drop_and_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.trainer.lr_drop = Some(LrDrop { epoch: 1, lr: 1e-4 });
        let t = trainer(cfg);

        assert_eq!(t.classifier_lr(1, 1e-2), 1e-2);
        assert_eq!(t.classifier_lr(2, 1e-2), 1e-4);
        assert_eq!(t.progress(0), format!("[0/{} (0%)]", t.loaders.train_samples));
    }

    #[test]
    fn test_classifier_test_outputs_are_saved_per_fold() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let run_dir = cfg.run_dir();

        let report = trainer(cfg.clone()).fit().unwrap();

        assert!(run_dir.join("test_outs_1.json").exists());
        assert!(run_dir.join("test_trgs_1.json").exists());
        let (preds, targets) = CheckpointManager::open(&run_dir)
            .unwrap()
            .load_test_outputs(cfg.fold_id)
            .unwrap();

        // Domain 1 is held out: half of the samples, half of them positive
        let held_out = samples().iter().filter(|s| s.domain == 1).count();
        assert_eq!(held_out, 24);
        assert_eq!(preds.len(), held_out);
        assert_eq!(targets.len(), held_out);
        assert_eq!(targets.iter().filter(|&&t| t == 1).count(), 12);
        assert!(preds.iter().all(|p| (0..2).contains(p)));

        let acc = report.classifier.test_log.unwrap().get("test_accuracy").unwrap();
        assert!((Metric::Accuracy.compute(&preds, &targets) - acc).abs() < 1e-9);
    }

    #[test]
    fn test_untracked_epochs_keep_latest_weights_as_best() {
        for monitor in ["min val_loss", "off"] {
            let dir = tempfile::tempdir().unwrap();
            let mut cfg = config(dir.path());
            cfg.data.validation_split = 0.0;
            cfg.trainer.monitor = monitor.to_string();
            cfg.trainer.early_stop = Some(0);

            let report = trainer(cfg.clone()).fit().unwrap();

            // No validation split, so val_loss never shows up and nothing can stop early
            assert_eq!(report.feature_net.last_epoch, 2, "{monitor}");
            assert_eq!(report.classifier.last_epoch, 2, "{monitor}");
            assert!(!report.feature_net.stopped_early, "{monitor}");
            assert!(!report.classifier.stopped_early, "{monitor}");
            assert!(report.classifier.test_log.is_some());

            let best = feature_net_logits(&cfg, "featurenet_best");
            let last = feature_net_logits(&cfg, "featurenet-checkpoint-epoch2");
            let first = feature_net_logits(&cfg, "featurenet-checkpoint-epoch1");
            assert!(max_abs_diff(&best, &last) < 1e-6, "{monitor}");
            assert!(max_abs_diff(&best, &first) > 1e-3, "{monitor}");

            let best = classifier_logits(&cfg, "classifier_best");
            let last = classifier_logits(&cfg, "classifier-checkpoint-epoch2");
            assert!(max_abs_diff(&best, &last) < 1e-6, "{monitor}");
        }
    }

    #[test]
    fn test_best_weights_stay_at_the_last_improving_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let run_dir = cfg.run_dir();
        trainer(cfg.clone()).fit().unwrap();
        let best_before = feature_net_logits(&cfg, "featurenet_best");

        // A recorded best no loss can beat: every resumed epoch is NotImproved
        let meta_path = run_dir.join("featurenet-checkpoint-epoch2.json");
        let mut meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
        meta["monitor_best"] = serde_json::json!(-1.0);
        std::fs::write(&meta_path, meta.to_string()).unwrap();

        let mut longer = cfg.clone();
        longer.trainer.epochs = 4;
        longer.trainer.early_stop = None;
        let mut t = trainer(longer.clone());
        t.resume(&meta_path).unwrap();
        let report = t.fit().unwrap();

        assert_eq!(report.feature_net.last_epoch, 4);
        assert!(!report.feature_net.stopped_early);
        assert_eq!(report.feature_net.monitor_best, -1.0);

        let best_after = feature_net_logits(&longer, "featurenet_best");
        let last = feature_net_logits(&longer, "featurenet-checkpoint-epoch4");
        assert!(max_abs_diff(&best_after, &best_before) < 1e-6);
        assert!(max_abs_diff(&best_after, &last) > 1e-3);
    }

    #[test]
    fn test_resume_and_test_pass_log_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.trainer.epochs = 1;
        let run_dir = cfg.run_dir();
        trainer(cfg.clone()).fit().unwrap();

        // Dropout has no weights, so the checkpoint still loads
        let mut changed = cfg;
        changed.arch.dropout = 0.1;

        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut t = trainer(changed);
            t.resume(&run_dir.join("featurenet-checkpoint-epoch1")).unwrap();
            assert!(t.test_classifier().unwrap().is_some());
        });

        let text = logs.contents();
        assert!(text.contains(
            "Architecture configuration given in config file is different from that of checkpoint. \
             This may yield an exception while state_dict is being loaded."
        ));
        assert!(text.contains("Test is completed"));
        assert!(!text.contains("Classifier training is completed"));
    }
}
