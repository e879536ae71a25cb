// ============================================================
// Layer 3 - Core Traits (Abstractions)
// ============================================================
// The application layer only talks to sample sources through
// this trait, so a JSON Lines file today and anything else
// tomorrow plug into the same training workflow.

use anyhow::Result;
use crate::domain::sample::Sample;

// ─── SampleSource ─────────────────────────────────────────────────────────────
/// Any component that can produce the full list of samples.
///
/// Implementations:
///   - JsonlLoader → reads one JSON object per line from a file
pub trait SampleSource {
    /// Load every available sample, in source order.
    fn load_all(&self) -> Result<Vec<Sample>>;
}
