// ============================================================
// Layer 6 - Metrics
// ============================================================
// Everything the trainer needs to turn per-batch numbers into
// one epoch-level log:
//
//   MetricLog     - ordered name → value map for one epoch
//   MetricTracker - running averages (loss per batch, metric
//                   functions once per epoch)
//   Metric        - classification scores over a whole epoch
//                   of predicted vs. true labels
//   MetricsLogger - appends every epoch log to a CSV file
//
// Example CSV output (featurenet_metrics.csv):
//   epoch,loss,accuracy,macro_f1,val_loss,val_accuracy,val_macro_f1
//   1,0.912345,0.610000,0.580000,0.880000,0.640000,0.600000

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use crate::infra::checkpoint::ModelKind;

// ─── MetricLog ────────────────────────────────────────────────────────────────
/// Metric values for one epoch or one evaluation pass.
/// Keys keep the order in which they were first inserted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricLog {
    entries: Vec<(String, f64)>,
}

impl MetricLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a value.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Copy every entry of `other` in, with `prefix` prepended to its key.
    pub fn extend_prefixed(&mut self, prefix: &str, other: &MetricLog) {
        for (key, value) in other.iter() {
            self.insert(format!("{prefix}{key}"), value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Print every entry the way the epoch summary is laid out.
    pub fn log_entries(&self) {
        for (key, value) in self.iter() {
            tracing::info!("    {:15}: {}", key, value);
        }
    }
}

// ─── MetricTracker ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    total: f64,
    count: usize,
}

/// Running averages for a fixed set of keys.
#[derive(Debug, Clone)]
pub struct MetricTracker {
    keys:   Vec<String>,
    values: Vec<Accumulator>,
}

impl MetricTracker {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let values = vec![Accumulator::default(); keys.len()];
        Self { keys, values }
    }

    /// Tracker for "loss" followed by every configured metric.
    pub fn for_metrics(metrics: &[Metric]) -> Self {
        Self::new(std::iter::once("loss").chain(metrics.iter().map(|m| m.name())))
    }

    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|acc| *acc = Accumulator::default());
    }

    /// Add `value` observed over `n` items. Unknown keys are ignored.
    pub fn update(&mut self, key: &str, value: f64, n: usize) {
        match self.keys.iter().position(|k| k == key) {
            Some(idx) => {
                let acc = &mut self.values[idx];
                acc.total += value * n as f64;
                acc.count += n;
            }
            None => tracing::debug!("ignoring update for untracked metric '{}'", key),
        }
    }

    pub fn avg(&self, key: &str) -> Option<f64> {
        let idx = self.keys.iter().position(|k| k == key)?;
        let acc = self.values[idx];
        Some(if acc.count > 0 { acc.total / acc.count as f64 } else { 0.0 })
    }

    pub fn result(&self) -> MetricLog {
        let mut log = MetricLog::new();
        for key in &self.keys {
            log.insert(key.clone(), self.avg(key).unwrap_or(0.0));
        }
        log
    }
}

// ─── Metric functions ─────────────────────────────────────────────────────────
/// Classification scores computed once per epoch from every
/// predicted label and every true label seen in that epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    MacroF1,
    BalancedAccuracy,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Accuracy         => "accuracy",
            Metric::MacroF1          => "macro_f1",
            Metric::BalancedAccuracy => "balanced_accuracy",
        }
    }

    pub fn compute(&self, preds: &[i64], targets: &[i64]) -> f64 {
        let n = preds.len().min(targets.len());
        if n == 0 {
            return 0.0;
        }
        match self {
            Metric::Accuracy => {
                let correct = preds.iter().zip(targets).filter(|(p, t)| p == t).count();
                correct as f64 / n as f64
            }
            Metric::MacroF1 => {
                let stats = ClassStats::collect(preds, targets);
                stats.mean_over_classes(|tp, fp, fn_| {
                    let denom = 2 * tp + fp + fn_;
                    if denom == 0 { 0.0 } else { (2 * tp) as f64 / denom as f64 }
                })
            }
            Metric::BalancedAccuracy => {
                // mean per-class recall over classes present in the targets
                let stats = ClassStats::collect(preds, targets);
                let recalls: Vec<f64> = stats
                    .classes
                    .iter()
                    .filter(|c| c.tp + c.fn_ > 0)
                    .map(|c| c.tp as f64 / (c.tp + c.fn_) as f64)
                    .collect();
                if recalls.is_empty() {
                    0.0
                } else {
                    recalls.iter().sum::<f64>() / recalls.len() as f64
                }
            }
        }
    }
}

pub fn default_metrics() -> Vec<Metric> {
    vec![Metric::Accuracy, Metric::MacroF1]
}

#[derive(Debug, Clone, Copy, Default)]
struct ClassCounts {
    tp:  usize,
    fp:  usize,
    fn_: usize,
}

/// Per-class confusion counts over every label seen in preds or targets.
struct ClassStats {
    classes: Vec<ClassCounts>,
}

impl ClassStats {
    fn collect(preds: &[i64], targets: &[i64]) -> Self {
        let mut labels: Vec<i64> = preds.iter().chain(targets).copied().collect();
        labels.sort_unstable();
        labels.dedup();

        let index = |label: i64| labels.binary_search(&label).unwrap_or(0);
        let mut classes = vec![ClassCounts::default(); labels.len()];
        for (&p, &t) in preds.iter().zip(targets) {
            if p == t {
                classes[index(t)].tp += 1;
            } else {
                classes[index(p)].fp += 1;
                classes[index(t)].fn_ += 1;
            }
        }
        Self { classes }
    }

    fn mean_over_classes(&self, score: impl Fn(usize, usize, usize) -> f64) -> f64 {
        if self.classes.is_empty() {
            return 0.0;
        }
        let total: f64 = self.classes.iter().map(|c| score(c.tp, c.fp, c.fn_)).sum();
        total / self.classes.len() as f64
    }
}

// ─── MetricsLogger ────────────────────────────────────────────────────────────
/// Appends epoch logs for one model kind to `<dir>/<kind>_metrics.csv`.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: &Path, kind: ModelKind) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;
        let csv_path = dir.join(format!("{}_metrics.csv", kind.file_prefix()));
        Ok(Self { csv_path })
    }

    /// Drop rows left over from an earlier run; used when a stage
    /// starts from epoch 1.
    pub fn restart(&self) -> Result<()> {
        if self.csv_path.exists() {
            fs::remove_file(&self.csv_path)
                .with_context(|| format!("Cannot reset '{}'", self.csv_path.display()))?;
            tracing::debug!("Cleared metrics CSV: '{}'", self.csv_path.display());
        }
        Ok(())
    }

    /// Append one row; the header is written with the first row.
    /// Fails when the file already holds a header for other columns.
    pub fn log(&self, epoch: usize, log: &MetricLog) -> Result<()> {
        let header = std::iter::once("epoch").chain(log.keys()).collect::<Vec<_>>().join(",");
        let existing = self.existing_header()?;
        if let Some(existing) = &existing {
            if *existing != header {
                bail!(
                    "'{}' has columns '{}' but this epoch logs '{}'",
                    self.csv_path.display(),
                    existing,
                    header
                );
            }
        }

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        if existing.is_none() {
            writeln!(f, "{header}")?;
            tracing::debug!("Created metrics CSV: '{}'", self.csv_path.display());
        }

        let row: Vec<String> = std::iter::once(epoch.to_string())
            .chain(log.iter().map(|(_, v)| format!("{v:.6}")))
            .collect();
        writeln!(f, "{}", row.join(","))?;
        Ok(())
    }

    /// First line of the CSV, `None` when the file is missing or empty.
    fn existing_header(&self) -> Result<Option<String>> {
        let Ok(file) = File::open(&self.csv_path) else {
            return Ok(None);
        };
        let mut first = String::new();
        BufReader::new(file)
            .read_line(&mut first)
            .with_context(|| format!("Cannot read '{}'", self.csv_path.display()))?;
        let first = first.trim_end();
        Ok((!first.is_empty()).then(|| first.to_string()))
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}
