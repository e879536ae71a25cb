// ============================================================
// Layer 4 - Train/Validation/Test Splitter
// ============================================================
// Turns the full sample list into the three splits a run uses:
//
//   - Test:       every sample of the held-out domain (fold_id),
//                 so the model is scored on an unseen domain
//   - Validation: a seeded random fraction of the remaining samples
//   - Training:   everything else
//
// The same seed always yields the same split, which is what lets
// `evaluate` rebuild exactly the test set a run was trained for.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::domain::sample::Sample;

/// Shuffle `samples` with a seeded RNG and split into (train, validation).
///
/// `train_fraction` is the proportion kept for training, e.g. 0.8.
pub fn split_train_val<T>(mut samples: Vec<T>, train_fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total    = samples.len();
    let split_at = ((total as f64) * train_fraction).round() as usize;
    let split_at = split_at.min(total);

    // After this: samples = [0..split_at], val = [split_at..total]
    let val = samples.split_off(split_at);

    tracing::debug!(
        "Dataset split: {} training, {} validation ({}% / {}%)",
        samples.len(),
        val.len(),
        (samples.len() * 100) / total.max(1),
        (val.len()     * 100) / total.max(1),
    );

    (samples, val)
}

/// Partition into (other domains, held-out domain), keeping order.
pub fn hold_out_domain(samples: Vec<Sample>, domain: usize) -> (Vec<Sample>, Vec<Sample>) {
    samples.into_iter().partition(|s| s.domain != domain)
}

/// The three splits of one run. Empty validation/test means "not used".
#[derive(Debug, Clone, Default)]
pub struct DataSplit {
    pub train: Vec<Sample>,
    pub valid: Vec<Sample>,
    pub test:  Vec<Sample>,
}

impl DataSplit {
    pub fn build(
        samples:          Vec<Sample>,
        fold_id:          Option<usize>,
        validation_split: f64,
        seed:             u64,
    ) -> Self {
        let (rest, test) = match fold_id {
            Some(domain) => hold_out_domain(samples, domain),
            None => (samples, Vec::new()),
        };
        let (train, valid) = if validation_split > 0.0 {
            split_train_val(rest, 1.0 - validation_split, seed)
        } else {
            (rest, Vec::new())
        };

        tracing::info!(
            "Split: {} train, {} validation, {} test{}",
            train.len(),
            valid.len(),
            test.len(),
            fold_id.map(|f| format!(" (held-out domain {f})")).unwrap_or_default(),
        );

        Self { train, valid, test }
    }
}
