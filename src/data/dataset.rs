use burn::data::dataset::Dataset;

use crate::domain::sample::Sample;

/// In-memory split (train, validation or test) exposed through
/// Burn's Dataset trait so a DataLoader can index into it.
pub struct DomainDataset {
    samples: Vec<Sample>,
}

impl DomainDataset {
    pub fn new(samples: Vec<Sample>) -> Self { Self { samples } }
}

impl Dataset<Sample> for DomainDataset {
    fn get(&self, index: usize) -> Option<Sample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
