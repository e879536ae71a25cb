// ============================================================
// Layer 4 - DataLoaders
// ============================================================
// Wraps the three splits in Burn DataLoaders:
//
//   train → autodiff backend, shuffled every epoch
//   valid → inner backend (no autodiff overhead)
//   test  → inner backend
//
// Empty validation/test splits produce no loader at all, which
// is how the trainer knows to skip those passes.

use std::sync::Arc;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    tensor::backend::AutodiffBackend,
};

use crate::application::config::DataConfig;
use crate::data::{
    batcher::{DomainBatch, DomainBatcher},
    dataset::DomainDataset,
    splitter::DataSplit,
};
use crate::domain::sample::Sample;

pub type BatchLoader<B> = Arc<dyn DataLoader<DomainBatch<B>>>;

pub struct Loaders<B: AutodiffBackend> {
    pub train:         BatchLoader<B>,
    pub valid:         Option<BatchLoader<B::InnerBackend>>,
    pub test:          Option<BatchLoader<B::InnerBackend>>,
    /// Number of training samples per epoch
    pub train_samples: usize,
    pub batch_size:    usize,
}

impl<B: AutodiffBackend> Loaders<B> {
    pub fn build(split: DataSplit, cfg: &DataConfig, device: &B::Device) -> Self {
        let train_samples = split.train.len();

        let train = DataLoaderBuilder::new(DomainBatcher::<B>::new(device.clone()))
            .batch_size(cfg.batch_size)
            .shuffle(cfg.seed)
            .num_workers(cfg.num_workers)
            .build(DomainDataset::new(split.train));

        Self {
            train,
            valid: eval_loader::<B>(split.valid, cfg, device),
            test: eval_loader::<B>(split.test, cfg, device),
            train_samples,
            batch_size: cfg.batch_size,
        }
    }

    /// Batches per training epoch
    pub fn len_epoch(&self) -> usize {
        self.train_samples.div_ceil(self.batch_size.max(1))
    }
}

fn eval_loader<B: AutodiffBackend>(
    samples: Vec<Sample>,
    cfg:     &DataConfig,
    device:  &B::Device,
) -> Option<BatchLoader<B::InnerBackend>> {
    if samples.is_empty() {
        return None;
    }
    let loader = DataLoaderBuilder::new(DomainBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .num_workers(cfg.num_workers)
        .build(DomainDataset::new(samples));
    Some(loader)
}
