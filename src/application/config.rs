// ============================================================
// Layer 2 - Experiment Configuration
// ============================================================
// Every knob of a training run lives in one JSON file:
//
//   {
//     "name": "pacs_mlp",
//     "fold_id": 0,
//     "arch":      { "input_dim": 16, "hidden_dim": 64, ... },
//     "optimizer": { "type": "adam", "lr": 0.001 },
//     "trainer":   { "epochs": 30, "save_dir": "saved",
//                    "monitor": "min val_loss", "early_stop": 5 },
//     "hyper_params": { "beta_d": 1.0, "beta_y": 0.1, "warmup": 10 },
//     "data":      { "path": "data/samples.jsonl", "batch_size": 32 },
//     "metrics":   ["accuracy", "macro_f1"]
//   }
//
// The effective config (after CLI overrides) is written into the
// run directory so a run can be evaluated or resumed later.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

use crate::domain::monitor::Monitor;
use crate::infra::metrics::{default_metrics, Metric};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,

    /// Domain held out as the test split (leave-one-domain-out)
    #[serde(default)]
    pub fold_id: Option<usize>,

    pub arch: ArchConfig,

    /// Optimizer for the feature network
    pub optimizer: OptimizerConfig,

    /// Optimizer for the classifier head; defaults to `optimizer`
    #[serde(default)]
    pub classifier_optimizer: Option<OptimizerConfig>,

    pub trainer: TrainerSettings,

    #[serde(default)]
    pub hyper_params: HyperParams,

    pub data: DataConfig,

    #[serde(default = "default_metrics")]
    pub metrics: Vec<Metric>,
}

/// Network sizes. Both networks are rebuilt from this when loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchConfig {
    pub input_dim:         usize,
    pub hidden_dim:        usize,
    pub latent_dim:        usize,
    pub num_classes:       usize,
    pub num_domains:       usize,
    #[serde(default = "default_classifier_hidden")]
    pub classifier_hidden: usize,
    #[serde(default = "default_dropout")]
    pub dropout:           f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    AdamW,
    Sgd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(rename = "type")]
    pub kind:         OptimizerKind,
    pub lr:           f64,
    #[serde(default)]
    pub weight_decay: f64,
}

/// Learning rate used by the classifier once `epoch` has been trained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LrDrop {
    pub epoch: usize,
    pub lr:    f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerSettings {
    pub epochs: usize,

    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,

    /// Write a resumable snapshot every `save_period` epochs
    #[serde(default = "default_save_period")]
    pub save_period: usize,

    /// "off" or "<min|max> <metric>"
    #[serde(default = "default_monitor")]
    pub monitor: String,

    /// Epochs without improvement tolerated before stopping
    #[serde(default)]
    pub early_stop: Option<usize>,

    #[serde(default)]
    pub lr_drop: Option<LrDrop>,
}

/// Weights of the auxiliary feature-net loss terms, ramped up
/// linearly over the first `warmup` epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub beta_d: f64,
    pub beta_y: f64,
    pub warmup: usize,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self { beta_d: 1.0, beta_y: 1.0, warmup: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// JSON Lines file, one sample per line
    pub path: PathBuf,

    pub batch_size: usize,

    /// Fraction of the non-test samples kept for validation
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

fn default_classifier_hidden() -> usize { 32 }
fn default_dropout() -> f64 { 0.1 }
fn default_save_dir() -> PathBuf { PathBuf::from("saved") }
fn default_save_period() -> usize { 1 }
fn default_monitor() -> String { "off".to_string() }
fn default_validation_split() -> f64 { 0.1 }
fn default_seed() -> u64 { 42 }
fn default_num_workers() -> usize { 1 }

impl ExperimentConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config file '{}'", path.display()))?;
        let cfg: Self = serde_json::from_str(&json)
            .with_context(|| format!("Malformed config file '{}'", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let arch = &self.arch;
        if arch.input_dim == 0 || arch.hidden_dim == 0 || arch.latent_dim == 0 || arch.classifier_hidden == 0 {
            bail!("arch dimensions must all be positive");
        }
        if arch.num_classes < 2 {
            bail!("arch.num_classes must be at least 2, got {}", arch.num_classes);
        }
        if arch.num_domains == 0 {
            bail!("arch.num_domains must be positive");
        }
        if !(0.0..1.0).contains(&arch.dropout) {
            bail!("arch.dropout must be in [0, 1), got {}", arch.dropout);
        }
        if self.trainer.epochs == 0 {
            bail!("trainer.epochs must be positive");
        }
        if self.trainer.save_period == 0 {
            bail!("trainer.save_period must be positive");
        }
        if self.data.batch_size == 0 {
            bail!("data.batch_size must be positive");
        }
        if self.data.num_workers == 0 {
            bail!("data.num_workers must be at least 1");
        }
        if !(0.0..1.0).contains(&self.data.validation_split) {
            bail!("data.validation_split must be in [0, 1), got {}", self.data.validation_split);
        }
        for opt in std::iter::once(&self.optimizer).chain(self.classifier_optimizer.as_ref()) {
            if opt.lr <= 0.0 {
                bail!("optimizer lr must be positive, got {}", opt.lr);
            }
        }
        if let Some(fold) = self.fold_id {
            if fold >= arch.num_domains {
                bail!("fold_id {} is out of range for {} domains", fold, arch.num_domains);
            }
        }
        self.monitor()?;
        Ok(())
    }

    pub fn monitor(&self) -> Result<Monitor> {
        Monitor::parse(&self.trainer.monitor, self.trainer.early_stop)
    }

    pub fn classifier_optimizer(&self) -> &OptimizerConfig {
        self.classifier_optimizer.as_ref().unwrap_or(&self.optimizer)
    }

    /// `<save_dir>/<name>/fold_<k>`, or `<save_dir>/<name>/all` without a fold.
    pub fn run_dir(&self) -> PathBuf {
        let leaf = match self.fold_id {
            Some(fold) => format!("fold_{fold}"),
            None => "all".to_string(),
        };
        self.trainer.save_dir.join(&self.name).join(leaf)
    }

    /// A small, valid configuration.
    pub fn example() -> Self {
        Self {
            name: "example".to_string(),
            fold_id: None,
            arch: ArchConfig {
                input_dim:         4,
                hidden_dim:        16,
                latent_dim:        8,
                num_classes:       2,
                num_domains:       2,
                classifier_hidden: 8,
                dropout:           0.0,
            },
            optimizer: OptimizerConfig { kind: OptimizerKind::Adam, lr: 1e-2, weight_decay: 0.0 },
            classifier_optimizer: None,
            trainer: TrainerSettings {
                epochs:      2,
                save_dir:    default_save_dir(),
                save_period: 1,
                monitor:     "min val_loss".to_string(),
                early_stop:  Some(3),
                lr_drop:     None,
            },
            hyper_params: HyperParams::default(),
            data: DataConfig {
                path:             PathBuf::from("data/samples.jsonl"),
                batch_size:       4,
                validation_split: 0.25,
                seed:             default_seed(),
                num_workers:      1,
            },
            metrics: default_metrics(),
        }
    }
}
