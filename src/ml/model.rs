use burn::{
    nn::{loss::CrossEntropyLossConfig, Dropout, DropoutConfig, Linear, LinearConfig},
    prelude::*,
    tensor::activation::relu,
};

use crate::application::config::ArchConfig;

// Config derive supplies Clone, Serialize and Deserialize itself.
#[derive(Config, Debug)]
pub struct FeatureNetConfig {
    pub input_dim:   usize,
    pub hidden_dim:  usize,
    pub latent_dim:  usize,
    pub num_classes: usize,
    pub num_domains: usize,
    #[config(default = 0.1)]
    pub dropout:     f64,
}

impl FeatureNetConfig {
    pub fn from_arch(arch: &ArchConfig) -> Self {
        Self::new(arch.input_dim, arch.hidden_dim, arch.latent_dim, arch.num_classes, arch.num_domains)
            .with_dropout(arch.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> FeatureNet<B> {
        FeatureNet {
            encoder_in:  LinearConfig::new(self.input_dim, self.hidden_dim).init(device),
            encoder_out: LinearConfig::new(self.hidden_dim, self.latent_dim).init(device),
            class_head:  LinearConfig::new(self.latent_dim, self.num_classes).init(device),
            domain_head: LinearConfig::new(self.latent_dim, self.num_domains).init(device),
            dropout:     DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Encoder trained in the first stage. Besides the class head it
/// carries a domain head whose loss shapes the latent space; only
/// `features` is used once the network is frozen.
#[derive(Module, Debug)]
pub struct FeatureNet<B: Backend> {
    pub encoder_in:  Linear<B>,
    pub encoder_out: Linear<B>,
    pub class_head:  Linear<B>,
    pub domain_head: Linear<B>,
    pub dropout:     Dropout,
}

/// Weights of the auxiliary terms in the feature-net loss.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossWeights {
    /// Latent magnitude penalty
    pub beta_y: f64,
    /// Domain classification loss
    pub beta_d: f64,
}

impl LossWeights {
    /// Linear ramp `min(beta, beta * epoch / warmup)` for both weights.
    pub fn warmed_up(beta_y: f64, beta_d: f64, warmup: usize, epoch: usize) -> Self {
        let ramp = |beta: f64| {
            if warmup == 0 {
                beta
            } else {
                beta.min(beta * epoch as f64 / warmup as f64)
            }
        };
        Self { beta_y: ramp(beta_y), beta_d: ramp(beta_d) }
    }
}

pub struct FeatureNetOutput<B: Backend> {
    /// Everything that gets backpropagated
    pub loss:       Tensor<B, 1>,
    /// Plain class cross-entropy, reported as the epoch "loss"
    pub class_loss: Tensor<B, 1>,
    /// Class logits, [batch, num_classes]
    pub logits:     Tensor<B, 2>,
}

impl<B: Backend> FeatureNet<B> {
    /// x: [batch, input_dim] → latent features: [batch, latent_dim]
    pub fn features(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.dropout.forward(relu(self.encoder_in.forward(x)));
        relu(self.encoder_out.forward(h))
    }

    /// Class logits: [batch, num_classes]
    pub fn predict(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.class_head.forward(self.features(x))
    }

    pub fn class_loss(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }

    /// loss = CE(class) + beta_d * CE(domain) + beta_y * mean(z²)
    pub fn forward_loss(
        &self,
        x:       Tensor<B, 2>,
        labels:  Tensor<B, 1, Int>,
        domains: Tensor<B, 1, Int>,
        weights: LossWeights,
    ) -> FeatureNetOutput<B> {
        let z = self.features(x);
        let logits        = self.class_head.forward(z.clone());
        let domain_logits = self.domain_head.forward(z.clone());

        let ce = CrossEntropyLossConfig::new().init(&logits.device());
        let class_loss  = ce.forward(logits.clone(), labels);
        let domain_loss = ce.forward(domain_logits, domains);
        let latent_norm = (z.clone() * z).mean();

        let loss = class_loss.clone()
            + domain_loss.mul_scalar(weights.beta_d)
            + latent_norm.mul_scalar(weights.beta_y);

        FeatureNetOutput { loss, class_loss, logits }
    }
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub latent_dim:  usize,
    pub hidden_dim:  usize,
    pub num_classes: usize,
    #[config(default = 0.1)]
    pub dropout:     f64,
}

impl ClassifierConfig {
    pub fn from_arch(arch: &ArchConfig) -> Self {
        Self::new(arch.latent_dim, arch.classifier_hidden, arch.num_classes).with_dropout(arch.dropout)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        Classifier {
            hidden:  LinearConfig::new(self.latent_dim, self.hidden_dim).init(device),
            output:  LinearConfig::new(self.hidden_dim, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

/// Head trained in the second stage on frozen latent features.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    pub hidden:  Linear<B>,
    pub output:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> Classifier<B> {
    /// features: [batch, latent_dim] → logits: [batch, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let h = self.dropout.forward(relu(self.hidden.forward(features)));
        self.output.forward(h)
    }

    pub fn forward_loss(
        &self,
        features: Tensor<B, 2>,
        labels:   Tensor<B, 1, Int>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(features);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), labels);
        (loss, logits)
    }

    /// Predicted class per row: [batch]
    pub fn predict(&self, features: Tensor<B, 2>) -> Tensor<B, 1, Int> {
        self.forward(features).argmax(1).flatten::<1>(0, 1)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_warmup_ramp() {
        let w = LossWeights::warmed_up(0.5, 2.0, 4, 1);
        assert_eq!(w, LossWeights { beta_y: 0.125, beta_d: 0.5 });
        let w = LossWeights::warmed_up(0.5, 2.0, 4, 4);
        assert_eq!(w, LossWeights { beta_y: 0.5, beta_d: 2.0 });
        // capped after warm-up
        let w = LossWeights::warmed_up(0.5, 2.0, 4, 10);
        assert_eq!(w, LossWeights { beta_y: 0.5, beta_d: 2.0 });
        // no warm-up configured
        let w = LossWeights::warmed_up(0.5, 2.0, 0, 1);
        assert_eq!(w, LossWeights { beta_y: 0.5, beta_d: 2.0 });
    }

    #[test]
    fn test_feature_net_shapes() {
        let device = Default::default();
        let net: FeatureNet<TestBackend> = FeatureNetConfig::new(5, 8, 3, 4, 2).init(&device);
        let x = Tensor::<TestBackend, 2>::zeros([6, 5], &device);
        assert_eq!(net.features(x.clone()).dims(), [6, 3]);
        assert_eq!(net.predict(x).dims(), [6, 4]);
    }

    #[test]
    fn test_feature_net_loss_is_scalar_and_backprops() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let net: FeatureNet<AD> = FeatureNetConfig::new(3, 6, 2, 2, 3).init(&device);
        let x = Tensor::<AD, 2>::from_floats([[0.1, -0.2, 0.3], [1.0, 0.5, -1.0]], &device);
        let y = Tensor::<AD, 1, Int>::from_ints([0, 1], &device);
        let d = Tensor::<AD, 1, Int>::from_ints([2, 0], &device);

        let out = net.forward_loss(x, y, d, LossWeights { beta_y: 0.1, beta_d: 1.0 });
        assert_eq!(out.loss.dims(), [1]);
        assert_eq!(out.logits.dims(), [2, 2]);

        let total: f32 = out.loss.clone().into_scalar();
        let class: f32 = out.class_loss.clone().into_scalar();
        assert!(total >= class);

        let grads = out.loss.backward();
        assert!(net.encoder_in.weight.val().grad(&grads).is_some());
    }

    #[test]
    fn test_classifier_predicts_one_label_per_row() {
        let device = Default::default();
        let clf: Classifier<TestBackend> = ClassifierConfig::new(3, 4, 5).init(&device);
        let feats = Tensor::<TestBackend, 2>::ones([7, 3], &device);
        assert_eq!(clf.forward(feats.clone()).dims(), [7, 5]);
        let preds = clf.predict(feats);
        assert_eq!(preds.dims(), [7]);

        let labels = Tensor::<TestBackend, 1, Int>::zeros([7], &device);
        let (loss, _) = clf.forward_loss(Tensor::ones([7, 3], &device), labels);
        assert_eq!(loss.dims(), [1]);
    }
}
