// ============================================================
// Layer 5 - Evaluation Passes
// ============================================================
// No-grad passes over a validation or test loader. Models come
// in already converted with `.valid()`, so everything here runs
// on the inner backend and dropout is disabled.
//
// Each pass fills a MetricTracker:
//   "loss"    - mean class cross-entropy over batches
//   <metric>  - computed once from every prediction in the pass

use burn::{data::dataloader::DataLoader, prelude::*};

use crate::data::batcher::DomainBatch;
use crate::infra::metrics::{Metric, MetricLog, MetricTracker};
use crate::ml::model::{Classifier, FeatureNet};

/// Predicted label per row of a logits tensor.
pub fn argmax_labels<B: Backend>(logits: Tensor<B, 2>) -> Vec<i64> {
    logits.argmax(1).flatten::<1>(0, 1).into_data().iter::<i64>().collect()
}

pub fn int_values<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<i64> {
    tensor.into_data().iter::<i64>().collect()
}

/// Epoch-level metrics from every prediction and target of the pass.
pub fn apply_metrics(tracker: &mut MetricTracker, metrics: &[Metric], preds: &[i64], targets: &[i64]) {
    for metric in metrics {
        tracker.update(metric.name(), metric.compute(preds, targets), 1);
    }
}

/// Validation/test pass of the feature network's own class head.
pub fn evaluate_feature_net<B: Backend>(
    model:   &FeatureNet<B>,
    loader:  &dyn DataLoader<DomainBatch<B>>,
    metrics: &[Metric],
    tracker: &mut MetricTracker,
) -> MetricLog {
    tracker.reset();
    let mut preds   = Vec::new();
    let mut targets = Vec::new();

    for batch in loader.iter() {
        let logits = model.predict(batch.x);
        let loss = model.class_loss(logits.clone(), batch.y.clone());
        tracker.update("loss", loss.into_scalar().elem::<f64>(), 1);

        preds.extend(argmax_labels(logits));
        targets.extend(int_values(batch.y));
    }

    apply_metrics(tracker, metrics, &preds, &targets);
    tracker.result()
}

/// Validation/test pass of the classifier on top of frozen features.
pub fn evaluate_classifier<B: Backend>(
    feature_net: &FeatureNet<B>,
    classifier:  &Classifier<B>,
    loader:      &dyn DataLoader<DomainBatch<B>>,
    metrics:     &[Metric],
    tracker:     &mut MetricTracker,
) -> MetricLog {
    classifier_outputs(feature_net, classifier, loader, metrics, tracker).log
}

/// Metrics of a classifier pass together with every prediction and
/// target, in loader order.
#[derive(Debug, Clone, Default)]
pub struct ClassifierOutputs {
    pub log:     MetricLog,
    pub preds:   Vec<i64>,
    pub targets: Vec<i64>,
}

pub fn classifier_outputs<B: Backend>(
    feature_net: &FeatureNet<B>,
    classifier:  &Classifier<B>,
    loader:      &dyn DataLoader<DomainBatch<B>>,
    metrics:     &[Metric],
    tracker:     &mut MetricTracker,
) -> ClassifierOutputs {
    tracker.reset();
    let mut preds   = Vec::new();
    let mut targets = Vec::new();

    for batch in loader.iter() {
        let features = feature_net.features(batch.x);
        let (loss, logits) = classifier.forward_loss(features, batch.y.clone());
        tracker.update("loss", loss.into_scalar().elem::<f64>(), 1);

        preds.extend(argmax_labels(logits));
        targets.extend(int_values(batch.y));
    }

    apply_metrics(tracker, metrics, &preds, &targets);
    ClassifierOutputs { log: tracker.result(), preds, targets }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{batcher::DomainBatcher, dataset::DomainDataset};
    use crate::domain::sample::Sample;
    use crate::ml::model::{ClassifierConfig, FeatureNetConfig};
    use burn::backend::NdArray;
    use burn::data::dataloader::DataLoaderBuilder;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_argmax_labels() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats([[0.1, 0.9], [2.0, -1.0], [0.0, 0.5]], &device);
        assert_eq!(argmax_labels(logits), vec![1, 0, 1]);
    }

    #[test]
    fn test_evaluation_passes_report_loss_and_metrics() {
        let device = <TestBackend as Backend>::Device::default();
        let samples: Vec<Sample> = (0..10)
            .map(|i| Sample::new(vec![i as f32 / 10.0, 1.0 - i as f32 / 10.0], i % 2, 0))
            .collect();
        let loader = DataLoaderBuilder::new(DomainBatcher::<TestBackend>::new(device.clone()))
            .batch_size(4)
            .build(DomainDataset::new(samples));

        let net = FeatureNetConfig::new(2, 4, 3, 2, 1).with_dropout(0.0).init::<TestBackend>(&device);
        let clf = ClassifierConfig::new(3, 4, 2).with_dropout(0.0).init::<TestBackend>(&device);
        let metrics = [Metric::Accuracy, Metric::MacroF1];
        let mut tracker = MetricTracker::for_metrics(&metrics);

        let log = evaluate_feature_net(&net, loader.as_ref(), &metrics, &mut tracker);
        let keys: Vec<&str> = log.keys().collect();
        assert_eq!(keys, vec!["loss", "accuracy", "macro_f1"]);
        assert!(log.get("loss").unwrap() > 0.0);
        let acc = log.get("accuracy").unwrap();
        assert!((0.0..=1.0).contains(&acc));

        let log = evaluate_classifier(&net, &clf, loader.as_ref(), &metrics, &mut tracker);
        assert!(log.get("loss").unwrap().is_finite());
        assert_eq!(log.len(), 3);

        let outs = classifier_outputs(&net, &clf, loader.as_ref(), &metrics, &mut tracker);
        assert_eq!(outs.preds.len(), 10);
        assert_eq!(outs.targets, (0..10).map(|i| i % 2).collect::<Vec<i64>>());
        assert!(outs.preds.iter().all(|p| (0..2).contains(p)));
        assert_eq!(outs.log, log);
    }
}
