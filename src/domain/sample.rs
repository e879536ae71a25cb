// ============================================================
// Layer 3 - Sample Domain Type
// ============================================================
// One labelled training example:
//   - a fixed-length input vector
//   - the class label the classifier must predict
//   - the domain (environment, subject, site...) it came from
//
// On disk each sample is one JSON object per line:
//   {"features": [0.1, 0.4, ...], "label": 2, "domain": 0}

use serde::{Deserialize, Serialize};

/// A labelled example tagged with the domain it was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Input vector, length must equal the configured input_dim
    pub features: Vec<f32>,

    /// Class index in `0..num_classes`
    pub label: usize,

    /// Domain index in `0..num_domains`
    pub domain: usize,
}

impl Sample {
    pub fn new(features: Vec<f32>, label: usize, domain: usize) -> Self {
        Self { features, label, domain }
    }

    pub fn dim(&self) -> usize {
        self.features.len()
    }
}
