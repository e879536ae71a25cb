// ============================================================
// Layer 3 - Performance Monitor
// ============================================================
// Tracks the best value of one metric across epochs and decides
// when training should stop early.
//
// Configured with a short string:
//   "off"           → nothing is tracked
//   "min val_loss"  → lower is better
//   "max val_macro_f1" → higher is better
//
// After every epoch the trainer hands over the metric value
// (or None if the epoch log has no such key) and gets back a
// Verdict telling it whether to keep the parameters as the new
// best and whether to stop.

use anyhow::{bail, Result};

/// Direction in which the monitored metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Off,
    Min,
    Max,
}

/// Outcome of feeding one epoch's metric to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// New best value - keep these parameters.
    Improved,
    /// No improvement, patience not yet exhausted.
    NotImproved,
    /// No improvement for more than `early_stop` epochs in a row.
    Stop,
    /// Monitoring is off (or was just switched off).
    Untracked,
}

#[derive(Debug, Clone)]
pub struct Monitor {
    mode:         MonitorMode,
    metric:       String,
    best:         f64,
    early_stop:   Option<usize>,
    not_improved: usize,
}

impl Monitor {
    /// Parse a monitor description such as `"min val_loss"` or `"off"`.
    pub fn parse(setting: &str, early_stop: Option<usize>) -> Result<Self> {
        let setting = setting.trim();
        if setting.is_empty() || setting == "off" {
            return Ok(Self::off());
        }

        let mut parts = setting.split_whitespace();
        let (Some(mode), Some(metric), None) = (parts.next(), parts.next(), parts.next()) else {
            bail!("monitor must be 'off' or '<min|max> <metric>', got '{setting}'");
        };
        let mode = match mode {
            "min" => MonitorMode::Min,
            "max" => MonitorMode::Max,
            other => bail!("monitor mode must be 'min' or 'max', got '{other}'"),
        };

        let mut monitor = Self {
            mode,
            metric: metric.to_string(),
            best: 0.0,
            early_stop,
            not_improved: 0,
        };
        monitor.reset();
        Ok(monitor)
    }

    pub fn off() -> Self {
        Self {
            mode:         MonitorMode::Off,
            metric:       String::new(),
            best:         0.0,
            early_stop:   None,
            not_improved: 0,
        }
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn early_stop(&self) -> Option<usize> {
        self.early_stop
    }

    pub fn is_active(&self) -> bool {
        self.mode != MonitorMode::Off
    }

    /// Back to the initial best value with a fresh patience counter.
    /// The mode is left alone: a monitor that was disabled stays disabled.
    pub fn reset(&mut self) {
        self.best = match self.mode {
            MonitorMode::Min => f64::INFINITY,
            MonitorMode::Max => f64::NEG_INFINITY,
            MonitorMode::Off => 0.0,
        };
        self.not_improved = 0;
    }

    /// Restore the best value read back from a checkpoint.
    pub fn restore_best(&mut self, best: f64) {
        if self.is_active() {
            self.best = best;
        }
    }

    pub fn observe(&mut self, value: Option<f64>) -> Verdict {
        if !self.is_active() {
            return Verdict::Untracked;
        }

        let Some(value) = value else {
            tracing::warn!(
                "Warning: Metric '{}' is not found. Model performance monitoring is disabled.",
                self.metric
            );
            self.mode = MonitorMode::Off;
            return Verdict::Untracked;
        };

        let improved = match self.mode {
            MonitorMode::Min => value < self.best,
            MonitorMode::Max => value > self.best,
            MonitorMode::Off => false,
        };

        if improved {
            self.best         = value;
            self.not_improved = 0;
            return Verdict::Improved;
        }

        self.not_improved += 1;
        match self.early_stop {
            Some(patience) if self.not_improved > patience => Verdict::Stop,
            _ => Verdict::NotImproved,
        }
    }
}
