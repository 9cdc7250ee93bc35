//! Pneumonia classifier: DenseNet backbone plus a small dense head
//!
//! The head follows the backbone's global average pool:
//! dropout, then per hidden layer Dense → ReLU → BatchNorm (optional) → Dropout,
//! then a single-logit Dense output.

use std::path::PathBuf;

use burn::{
    config::Config,
    module::Module,
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Tensor},
};
use tracing::{info, warn};

use super::densenet::{DenseNet, DenseNetConfig};
use super::pretrained::load_pretrained_backbone;
use crate::utils::error::{self, PneumoniaError};

/// ImageNet channel statistics for inputs scaled to [0, 1]
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Backbone configuration
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// DenseNet architecture
    #[config(default = "DenseNetConfig::densenet121()")]
    pub densenet: DenseNetConfig,

    /// torchvision `densenet121` state dict to start from
    pub pretrained_weights: Option<PathBuf>,

    /// Normalize [0, 1] inputs with ImageNet mean/std inside the model
    #[config(default = "false")]
    pub imagenet_normalization: bool,

    /// Parameterised backbone layers with a lower index are frozen
    #[config(default = "0")]
    pub trainable_from: usize,
}

impl BackboneConfig {
    /// Whether every backbone layer is frozen
    pub fn fully_frozen(&self) -> bool {
        self.trainable_from >= self.densenet.num_param_layers()
    }
}

/// One hidden dense layer of the head
#[derive(Config, Debug)]
pub struct HiddenLayerConfig {
    pub units: usize,
    pub dropout: f64,
}

/// Classification head configuration
#[derive(Config, Debug)]
pub struct HeadConfig {
    /// Dropout applied to the pooled backbone features
    pub input_dropout: f64,

    /// Hidden layers between the pooled features and the output logit
    pub hidden: Vec<HiddenLayerConfig>,

    /// Batch normalization after each hidden activation
    #[config(default = "true")]
    pub batch_norm: bool,
}

/// Full model configuration, persisted next to the weights
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub backbone: BackboneConfig,
    pub head: HeadConfig,
}

impl ClassifierConfig {
    /// Check ranges that Burn would otherwise reject at init time
    pub fn validate(&self) -> error::Result<()> {
        let check_dropout = |name: &str, p: f64| {
            if (0.0..1.0).contains(&p) {
                Ok(())
            } else {
                Err(PneumoniaError::Config(format!(
                    "{} must be in range [0.0, 1.0), got {}",
                    name, p
                )))
            }
        };

        check_dropout("head.input_dropout", self.head.input_dropout)?;
        for (i, layer) in self.head.hidden.iter().enumerate() {
            if layer.units == 0 {
                return Err(PneumoniaError::Config(format!(
                    "head.hidden[{}].units must be greater than 0",
                    i
                )));
            }
            check_dropout(&format!("head.hidden[{}].dropout", i), layer.dropout)?;
        }

        let densenet = &self.backbone.densenet;
        if densenet.growth_rate == 0 || densenet.num_init_features == 0 || densenet.bn_size == 0 {
            return Err(PneumoniaError::Config(
                "backbone.densenet sizes must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Initialize the model with random weights and no frozen layers
    pub fn init<B: Backend>(&self, device: &B::Device) -> PneumoniaClassifier<B> {
        let backbone = self.backbone.densenet.init(device);
        let mut in_features = backbone.num_features();

        let hidden = self
            .head
            .hidden
            .iter()
            .map(|layer| {
                let block = HiddenLayer {
                    linear: LinearConfig::new(in_features, layer.units).init(device),
                    norm: self
                        .head
                        .batch_norm
                        .then(|| BatchNormConfig::new(layer.units).init(device)),
                    dropout: DropoutConfig::new(layer.dropout).init(),
                    relu: Relu::new(),
                };
                in_features = layer.units;
                block
            })
            .collect();

        PneumoniaClassifier {
            backbone,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            input_dropout: DropoutConfig::new(self.head.input_dropout).init(),
            hidden,
            output: LinearConfig::new(in_features, 1).init(device),
            imagenet_normalization: self.backbone.imagenet_normalization,
        }
    }

    /// Build the model for training: pretrained weights (when configured),
    /// then the layer cutoff.
    ///
    /// Freezing is applied last since loading a record resets parameter state.
    pub fn build<B: Backend>(
        &self,
        device: &B::Device,
    ) -> error::Result<PneumoniaClassifier<B>> {
        self.validate()?;
        let mut model = self.init::<B>(device);

        match &self.backbone.pretrained_weights {
            Some(path) => {
                model.backbone = load_pretrained_backbone(model.backbone, path, device)?;
            }
            None => warn!("No pretrained backbone weights configured; using random initialization"),
        }

        let cutoff = self.backbone.trainable_from;
        if cutoff > 0 {
            info!(
                "Freezing backbone layers [0, {}) of {}",
                cutoff.min(model.backbone.num_param_layers()),
                model.backbone.num_param_layers()
            );
        }
        model.backbone = model.backbone.freeze_below(cutoff);

        Ok(model)
    }
}

/// Dense → ReLU → BatchNorm → Dropout
#[derive(Module, Debug)]
pub struct HiddenLayer<B: Backend> {
    pub linear: Linear<B>,
    pub norm: Option<BatchNorm<B, 0>>,
    dropout: Dropout,
    relu: Relu,
}

impl<B: Backend> HiddenLayer<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.relu.forward(self.linear.forward(x));
        let x = match &self.norm {
            Some(norm) => norm.forward(x),
            None => x,
        };
        self.dropout.forward(x)
    }
}

/// Binary chest X-ray classifier
#[derive(Module, Debug)]
pub struct PneumoniaClassifier<B: Backend> {
    pub backbone: DenseNet<B>,
    global_pool: AdaptiveAvgPool2d,
    input_dropout: Dropout,
    pub hidden: Vec<HiddenLayer<B>>,
    pub output: Linear<B>,
    imagenet_normalization: bool,
}

impl<B: Backend> PneumoniaClassifier<B> {
    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Images of shape [batch_size, 3, 224, 224] with values in [0, 1]
    ///
    /// # Returns
    /// * Logits of shape [batch_size, 1]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = if self.imagenet_normalization {
            normalize_imagenet(x)
        } else {
            x
        };

        let x = self.backbone.forward(x);
        let x = self.global_pool.forward(x);

        // [B, C, 1, 1] -> [B, C]
        let [batch_size, channels, _, _] = x.dims();
        let mut x = self.input_dropout.forward(x.reshape([batch_size, channels]));

        for layer in &self.hidden {
            x = layer.forward(x);
        }

        self.output.forward(x)
    }

    /// Pneumonia probability per image, shape [batch_size, 1]
    pub fn forward_probability(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(x))
    }
}

fn normalize_imagenet<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let device = x.device();
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN, &device).reshape([1, 3, 1, 1]);
    let std = Tensor::<B, 1>::from_floats(IMAGENET_STD, &device).reshape([1, 3, 1, 1]);
    (x - mean) / std
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny_config(batch_norm: bool) -> ClassifierConfig {
        ClassifierConfig::new(
            BackboneConfig::new().with_densenet(DenseNetConfig::tiny()),
            HeadConfig::new(
                0.5,
                vec![HiddenLayerConfig::new(16, 0.5), HiddenLayerConfig::new(8, 0.3)],
            )
            .with_batch_norm(batch_norm),
        )
    }

    #[test]
    fn test_output_shape_and_range() {
        let device = Default::default();
        let model = tiny_config(true).init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 224, 224],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let logits = model.forward(input.clone());
        assert_eq!(logits.dims(), [2, 1]);

        let probs = model
            .forward_probability(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_head_without_batch_norm() {
        let device = Default::default();
        let model = tiny_config(false).init::<TestBackend>(&device);
        assert_eq!(model.hidden.len(), 2);
        assert!(model.hidden.iter().all(|h| h.norm.is_none()));
    }

    #[test]
    fn test_imagenet_normalization_path() {
        let device = Default::default();
        let mut config = tiny_config(true);
        config.backbone.imagenet_normalization = true;
        let model = config.init::<TestBackend>(&device);

        let output = model.forward(Tensor::<TestBackend, 4>::zeros([1, 3, 64, 64], &device));
        assert_eq!(output.dims(), [1, 1]);
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let mut config = tiny_config(true);
        config.head.hidden[0].dropout = 1.0;
        assert!(matches!(config.validate(), Err(PneumoniaError::Config(_))));
    }

    #[test]
    fn test_fully_frozen() {
        let config = BackboneConfig::new().with_trainable_from(241);
        assert!(config.fully_frozen());
        assert!(!BackboneConfig::new().with_trainable_from(226).fully_frozen());
    }

    #[test]
    fn test_build_without_pretrained_weights() {
        let device = Default::default();
        let mut config = tiny_config(true);
        config.backbone.trainable_from = 10;
        let model = config.build::<TestBackend>(&device).unwrap();
        assert_eq!(model.backbone.num_param_layers(), 41);
    }
}
