// ============================================================
// Layer 4 - Sample Loader
// ============================================================
// Reads samples from a JSON Lines file:
//
//   {"features": [0.12, 0.98, -0.3], "label": 1, "domain": 0}
//   {"features": [0.40, 0.11,  0.7], "label": 0, "domain": 2}
//
// Blank lines are skipped. A malformed line fails the whole
// load with its line number so the file can be fixed.

use anyhow::{bail, Context, Result};
use std::{fs, path::PathBuf};

use crate::application::config::ArchConfig;
use crate::domain::sample::Sample;
use crate::domain::traits::SampleSource;

/// Loads every sample of one `.jsonl` file.
/// Implements the SampleSource trait from Layer 3.
pub struct JsonlLoader {
    path: PathBuf,
}

impl JsonlLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SampleSource for JsonlLoader {
    fn load_all(&self) -> Result<Vec<Sample>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Cannot read samples from '{}'", self.path.display()))?;

        let mut samples = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let sample: Sample = serde_json::from_str(line).with_context(|| {
                format!("{}:{}: malformed sample", self.path.display(), idx + 1)
            })?;
            samples.push(sample);
        }

        tracing::info!("Loaded {} samples from '{}'", samples.len(), self.path.display());
        Ok(samples)
    }
}

/// Check every sample against the network sizes before any tensor is built.
pub fn validate_samples(samples: &[Sample], arch: &ArchConfig) -> Result<()> {
    if samples.is_empty() {
        bail!("no samples to train on");
    }
    for (idx, s) in samples.iter().enumerate() {
        if s.dim() != arch.input_dim {
            bail!("sample {idx} has {} features, expected {}", s.dim(), arch.input_dim);
        }
        if s.label >= arch.num_classes {
            bail!("sample {idx} has label {}, but num_classes is {}", s.label, arch.num_classes);
        }
        if s.domain >= arch.num_domains {
            bail!("sample {idx} has domain {}, but num_domains is {}", s.domain, arch.num_domains);
        }
        if s.features.iter().any(|v| !v.is_finite()) {
            bail!("sample {idx} has a non-finite feature value");
        }
    }
    Ok(())
}
