//! DenseNet Backbone
//!
//! DenseNet-BC feature extractor with the torchvision module layout
//! (`conv0`, `norm0`, `denseblock1..4`, `transition1..3`, `norm5`), so that
//! pretrained `densenet121` state dicts map onto it key for key.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Configuration for a four-block DenseNet-BC
#[derive(Config, Debug)]
pub struct DenseNetConfig {
    /// Channels added by each dense layer
    #[config(default = "32")]
    pub growth_rate: usize,

    /// Number of dense layers in each of the four blocks
    #[config(default = "[6, 12, 24, 16]")]
    pub block_config: [usize; 4],

    /// Channels produced by the stem convolution
    #[config(default = "64")]
    pub num_init_features: usize,

    /// Bottleneck width multiplier (1x1 conv outputs `bn_size * growth_rate`)
    #[config(default = "4")]
    pub bn_size: usize,
}

impl DenseNetConfig {
    /// DenseNet121: growth 32, blocks (6, 12, 24, 16), 1024 output features
    pub fn densenet121() -> Self {
        Self::new()
    }

    /// Narrow four-block variant used for fast CPU tests
    pub fn tiny() -> Self {
        Self::new()
            .with_growth_rate(4)
            .with_block_config([2, 2, 2, 2])
            .with_num_init_features(8)
            .with_bn_size(2)
    }

    /// Channels of the final feature map
    pub fn num_features(&self) -> usize {
        let last = self.block_config.len() - 1;
        let mut features = self.num_init_features;

        for (i, &num_layers) in self.block_config.iter().enumerate() {
            features += num_layers * self.growth_rate;
            if i != last {
                features /= 2;
            }
        }

        features
    }

    /// Number of parameterised layers (convolutions and batch norms)
    ///
    /// Stem conv + norm, four per dense layer, two per transition, final norm.
    pub fn num_param_layers(&self) -> usize {
        let dense_layers: usize = self.block_config.iter().sum();
        2 + 4 * dense_layers + 2 * (self.block_config.len() - 1) + 1
    }

    /// Initialize a backbone with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> DenseNet<B> {
        let conv0 = Conv2dConfig::new([3, self.num_init_features], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let norm0 = BatchNormConfig::new(self.num_init_features).init(device);
        let pool0 = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let [n1, n2, n3, n4] = self.block_config;
        let growth = self.growth_rate;
        let mut features = self.num_init_features;

        let denseblock1 = DenseBlock::new(n1, features, growth, self.bn_size, device);
        features += n1 * growth;
        let transition1 = Transition::new(features, features / 2, device);
        features /= 2;

        let denseblock2 = DenseBlock::new(n2, features, growth, self.bn_size, device);
        features += n2 * growth;
        let transition2 = Transition::new(features, features / 2, device);
        features /= 2;

        let denseblock3 = DenseBlock::new(n3, features, growth, self.bn_size, device);
        features += n3 * growth;
        let transition3 = Transition::new(features, features / 2, device);
        features /= 2;

        let denseblock4 = DenseBlock::new(n4, features, growth, self.bn_size, device);
        features += n4 * growth;

        let norm5 = BatchNormConfig::new(features).init(device);

        DenseNet {
            conv0,
            norm0,
            pool0,
            denseblock1,
            transition1,
            denseblock2,
            transition2,
            denseblock3,
            transition3,
            denseblock4,
            norm5,
            relu: Relu::new(),
            norm0_frozen: false,
            norm5_frozen: false,
            num_features: features,
        }
    }
}

/// Bottleneck dense layer: BN-ReLU-Conv1x1-BN-ReLU-Conv3x3
#[derive(Module, Debug)]
pub struct DenseLayer<B: Backend> {
    pub norm1: BatchNorm<B, 2>,
    pub conv1: Conv2d<B>,
    pub norm2: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    relu: Relu,
    norm1_frozen: bool,
    norm2_frozen: bool,
}

impl<B: Backend> DenseLayer<B> {
    pub fn new(in_channels: usize, growth_rate: usize, bn_size: usize, device: &B::Device) -> Self {
        let bottleneck = bn_size * growth_rate;

        Self {
            norm1: BatchNormConfig::new(in_channels).init(device),
            conv1: Conv2dConfig::new([in_channels, bottleneck], [1, 1])
                .with_bias(false)
                .init(device),
            norm2: BatchNormConfig::new(bottleneck).init(device),
            conv2: Conv2dConfig::new([bottleneck, growth_rate], [3, 3])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_bias(false)
                .init(device),
            relu: Relu::new(),
            norm1_frozen: false,
            norm2_frozen: false,
        }
    }

    /// Returns only the `growth_rate` new feature maps
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(batch_norm(&self.norm1, self.norm1_frozen, x));
        let x = self.conv1.forward(x);
        let x = self.relu.forward(batch_norm(&self.norm2, self.norm2_frozen, x));
        self.conv2.forward(x)
    }
}

/// Sequence of dense layers, each seeing the concatenation of all previous outputs
#[derive(Module, Debug)]
pub struct DenseBlock<B: Backend> {
    pub layers: Vec<DenseLayer<B>>,
}

impl<B: Backend> DenseBlock<B> {
    pub fn new(
        num_layers: usize,
        in_channels: usize,
        growth_rate: usize,
        bn_size: usize,
        device: &B::Device,
    ) -> Self {
        let layers = (0..num_layers)
            .map(|i| DenseLayer::new(in_channels + i * growth_rate, growth_rate, bn_size, device))
            .collect();

        Self { layers }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut features = x;
        for layer in &self.layers {
            let new_features = layer.forward(features.clone());
            features = Tensor::cat(vec![features, new_features], 1);
        }
        features
    }
}

/// Compression between blocks: BN-ReLU-Conv1x1-AvgPool2x2
#[derive(Module, Debug)]
pub struct Transition<B: Backend> {
    pub norm: BatchNorm<B, 2>,
    pub conv: Conv2d<B>,
    pool: AvgPool2d,
    relu: Relu,
    norm_frozen: bool,
}

impl<B: Backend> Transition<B> {
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            norm: BatchNormConfig::new(in_channels).init(device),
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_bias(false)
                .init(device),
            pool: AvgPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu: Relu::new(),
            norm_frozen: false,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.relu.forward(batch_norm(&self.norm, self.norm_frozen, x));
        let x = self.conv.forward(x);
        self.pool.forward(x)
    }
}

/// DenseNet feature extractor
///
/// Input `[batch, 3, H, W]`, output `[batch, num_features, H/32, W/32]`
/// after the final batch norm and ReLU.
#[derive(Module, Debug)]
pub struct DenseNet<B: Backend> {
    pub conv0: Conv2d<B>,
    pub norm0: BatchNorm<B, 2>,
    pool0: MaxPool2d,
    pub denseblock1: DenseBlock<B>,
    pub transition1: Transition<B>,
    pub denseblock2: DenseBlock<B>,
    pub transition2: Transition<B>,
    pub denseblock3: DenseBlock<B>,
    pub transition3: Transition<B>,
    pub denseblock4: DenseBlock<B>,
    pub norm5: BatchNorm<B, 2>,
    relu: Relu,
    norm0_frozen: bool,
    norm5_frozen: bool,
    num_features: usize,
}

impl<B: Backend> DenseNet<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv0.forward(x);
        let x = self.relu.forward(batch_norm(&self.norm0, self.norm0_frozen, x));
        let x = self.pool0.forward(x);

        let x = self.denseblock1.forward(x);
        let x = self.transition1.forward(x);
        let x = self.denseblock2.forward(x);
        let x = self.transition2.forward(x);
        let x = self.denseblock3.forward(x);
        let x = self.transition3.forward(x);
        let x = self.denseblock4.forward(x);

        self.relu.forward(batch_norm(&self.norm5, self.norm5_frozen, x))
    }

    /// Channels of the output feature map
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Number of parameterised layers in forward order
    pub fn num_param_layers(&self) -> usize {
        let dense_layers: usize = self.blocks().iter().map(|b| b.layers.len()).sum();
        2 + 4 * dense_layers + 2 * 3 + 1
    }

    /// Exclude from gradient computation every parameterised layer whose
    /// forward-order index is below `trainable_from`.
    ///
    /// Frozen batch norms also switch to inference behaviour: they normalise
    /// with their running statistics and never update them, in training
    /// mode as well.
    ///
    /// Layer order: `conv0`, `norm0`, then per dense layer `norm1`, `conv1`,
    /// `norm2`, `conv2`, per transition `norm`, `conv`, and finally `norm5`.
    pub fn freeze_below(self, trainable_from: usize) -> Self {
        let mut cutoff = LayerCutoff {
            trainable_from,
            index: 0,
        };

        let conv0 = cutoff.apply(self.conv0);
        let (norm0, norm0_frozen) = cutoff.apply_norm(self.norm0);
        let denseblock1 = freeze_block(self.denseblock1, &mut cutoff);
        let transition1 = freeze_transition(self.transition1, &mut cutoff);
        let denseblock2 = freeze_block(self.denseblock2, &mut cutoff);
        let transition2 = freeze_transition(self.transition2, &mut cutoff);
        let denseblock3 = freeze_block(self.denseblock3, &mut cutoff);
        let transition3 = freeze_transition(self.transition3, &mut cutoff);
        let denseblock4 = freeze_block(self.denseblock4, &mut cutoff);
        let (norm5, norm5_frozen) = cutoff.apply_norm(self.norm5);

        Self {
            conv0,
            norm0,
            pool0: self.pool0,
            denseblock1,
            transition1,
            denseblock2,
            transition2,
            denseblock3,
            transition3,
            denseblock4,
            norm5,
            relu: self.relu,
            norm0_frozen,
            norm5_frozen,
            num_features: self.num_features,
        }
    }

    fn blocks(&self) -> [&DenseBlock<B>; 4] {
        [
            &self.denseblock1,
            &self.denseblock2,
            &self.denseblock3,
            &self.denseblock4,
        ]
    }
}

/// Walks layers in forward order and freezes those below the cutoff
struct LayerCutoff {
    trainable_from: usize,
    index: usize,
}

impl LayerCutoff {
    fn apply<B: Backend, M: Module<B>>(&mut self, module: M) -> M {
        let frozen = self.index < self.trainable_from;
        self.index += 1;
        if frozen {
            module.no_grad()
        } else {
            module
        }
    }

    fn apply_norm<B: Backend>(&mut self, norm: BatchNorm<B, 2>) -> (BatchNorm<B, 2>, bool) {
        let frozen = self.index < self.trainable_from;
        (self.apply(norm), frozen)
    }
}

/// Batch norm forward; frozen layers always use the running statistics
fn batch_norm<B: Backend>(
    norm: &BatchNorm<B, 2>,
    frozen: bool,
    x: Tensor<B, 4>,
) -> Tensor<B, 4> {
    if !frozen {
        return norm.forward(x);
    }

    let [channels] = norm.gamma.val().dims();
    let shape = [1, channels, 1, 1];
    let mean = norm.running_mean.value().reshape(shape);
    let std = norm
        .running_var
        .value()
        .add_scalar(norm.epsilon)
        .sqrt()
        .reshape(shape);

    (x - mean) / std * norm.gamma.val().reshape(shape) + norm.beta.val().reshape(shape)
}

fn freeze_block<B: Backend>(block: DenseBlock<B>, cutoff: &mut LayerCutoff) -> DenseBlock<B> {
    let layers = block
        .layers
        .into_iter()
        .map(|layer| {
            let (norm1, norm1_frozen) = cutoff.apply_norm(layer.norm1);
            let conv1 = cutoff.apply(layer.conv1);
            let (norm2, norm2_frozen) = cutoff.apply_norm(layer.norm2);
            let conv2 = cutoff.apply(layer.conv2);

            DenseLayer {
                norm1,
                conv1,
                norm2,
                conv2,
                relu: layer.relu,
                norm1_frozen,
                norm2_frozen,
            }
        })
        .collect();

    DenseBlock { layers }
}

fn freeze_transition<B: Backend>(
    transition: Transition<B>,
    cutoff: &mut LayerCutoff,
) -> Transition<B> {
    let (norm, norm_frozen) = cutoff.apply_norm(transition.norm);

    Transition {
        norm,
        conv: cutoff.apply(transition.conv),
        pool: transition.pool,
        relu: transition.relu,
        norm_frozen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;

    type TestBackend = NdArray;

    #[test]
    fn test_densenet121_dimensions() {
        let config = DenseNetConfig::densenet121();
        assert_eq!(config.num_features(), 1024);
        assert_eq!(config.num_param_layers(), 241);
    }

    #[test]
    fn test_tiny_forward_shape() {
        let device = Default::default();
        let config = DenseNetConfig::tiny();
        let model = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 224, 224], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, config.num_features(), 7, 7]);
        assert_eq!(model.num_features(), config.num_features());
        assert_eq!(model.num_param_layers(), config.num_param_layers());
    }

    #[test]
    fn test_freeze_below_counts_parameters() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let config = DenseNetConfig::tiny();

        let total = config.init::<AD>(&device).num_params();

        // freezing everything leaves the parameter count unchanged
        let frozen = config
            .init::<AD>(&device)
            .freeze_below(config.num_param_layers());
        assert_eq!(frozen.num_params(), total);

        // stem stays frozen, the rest still receives gradients
        let partial = config.init::<AD>(&device).freeze_below(2);
        let input = Tensor::<AD, 4>::ones([1, 3, 64, 64], &device);
        let grads = partial.forward(input).sum().backward();
        assert!(partial.conv0.weight.val().grad(&grads).is_none());
        assert!(partial.norm5.gamma.val().grad(&grads).is_some());
    }

    fn running_mean<B: Backend>(norm: &BatchNorm<B, 2>) -> Vec<f32> {
        norm.running_mean
            .value_sync()
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn test_frozen_batch_norm_keeps_running_stats() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let config = DenseNetConfig::tiny();
        // stem conv and norm frozen, everything after trains
        let model = config.init::<AD>(&device).freeze_below(2);

        let norm0_before = running_mean(&model.norm0);
        let norm5_before = running_mean(&model.norm5);

        let input = Tensor::<AD, 4>::random(
            [2, 3, 64, 64],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );
        let _ = model.forward(input);

        assert_eq!(running_mean(&model.norm0), norm0_before);
        assert_ne!(running_mean(&model.norm5), norm5_before);
    }

    #[test]
    fn test_fully_frozen_training_forward_matches_inference() {
        type AD = Autodiff<TestBackend>;
        let device = Default::default();
        let config = DenseNetConfig::tiny();
        let model = config
            .init::<AD>(&device)
            .freeze_below(config.num_param_layers());

        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 64, 64],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &device,
        );

        let trained = model
            .forward(Tensor::from_inner(input.clone()))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let inferred = model
            .valid()
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(trained.len(), inferred.len());
        for (a, b) in trained.iter().zip(&inferred) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }
}
