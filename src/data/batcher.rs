// ============================================================
// Layer 4 - Domain Batcher
// ============================================================
// Implements Burn's Batcher trait to stack a Vec<Sample> into
// the three tensors every training step needs:
//
//   x: [batch, input_dim]   float features
//   y: [batch]              class labels
//   d: [batch]              domain labels
//
// Features are flattened row-major and reshaped:
//   [s1_f1, s1_f2, ..., s1_fF, s2_f1, ..., sN_fF] → [N, F]

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::sample::Sample;

/// A batch of samples on one device.
#[derive(Debug, Clone)]
pub struct DomainBatch<B: Backend> {
    pub x: Tensor<B, 2>,
    pub y: Tensor<B, 1, Int>,
    pub d: Tensor<B, 1, Int>,
}

/// Holds the target device so tensors are created where the model lives.
#[derive(Clone, Debug)]
pub struct DomainBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> DomainBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }
}

impl<B: Backend> Batcher<Sample, DomainBatch<B>> for DomainBatcher<B> {
    fn batch(&self, items: Vec<Sample>) -> DomainBatch<B> {
        let batch_size = items.len();
        // validate_samples guarantees a shared width
        let input_dim = items.first().map(Sample::dim).unwrap_or(0);

        let features: Vec<f32> = items
            .iter()
            .flat_map(|s| s.features.iter().copied())
            .collect();
        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();
        let domains: Vec<i32> = items.iter().map(|s| s.domain as i32).collect();

        let x = Tensor::<B, 1>::from_floats(features.as_slice(), &self.device)
            .reshape([batch_size, input_dim]);
        let y = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);
        let d = Tensor::<B, 1, Int>::from_ints(domains.as_slice(), &self.device);

        DomainBatch { x, y, d }
    }
}
