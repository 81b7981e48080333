//! CNN architecture for face attribute classification.
//!
//! A shared convolutional backbone feeds two prediction heads, one per
//! attribute. Both heads output softmax probabilities; the loss is binary
//! cross-entropy over those probabilities.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

// The crate `Result` alias must not be imported here: `#[derive(Config)]`
// expands code that expects `std::result::Result` in scope.
use crate::error::Error;

/// Names of the sub-modules that can be selectively trained.
pub const LAYER_NAMES: [&str; 6] = [
    "conv1",
    "conv2",
    "conv3",
    "conv4",
    "fc_race",
    "fc_gender",
];

/// Expand a search-space preset into a `layers_to_train` list.
///
/// An empty list means everything is trainable.
pub fn freeze_preset(name: &str) -> crate::error::Result<Vec<String>> {
    let layers: &[&str] = match name {
        "all" => &[],
        "upper" => &["conv3", "conv4", "fc_race", "fc_gender"],
        "heads" => &["fc_race", "fc_gender"],
        other => {
            return Err(Error::Config(format!(
                "unknown layer preset '{}' (known: all, upper, heads)",
                other
            )))
        }
    };
    Ok(layers.iter().map(|s| s.to_string()).collect())
}

/// Configuration for the face attribute classifier.
#[derive(Config, Debug)]
pub struct FaceClassifierConfig {
    /// Number of ethnicity classes
    #[config(default = "7")]
    pub num_race_classes: usize,

    /// Number of gender classes
    #[config(default = "2")]
    pub num_gender_classes: usize,

    /// Dropout rate before the heads
    #[config(default = "0.3")]
    pub dropout_rate: f64,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,

    /// Whether normalization layers update their running statistics.
    /// When off, batch norm momentum is zero and the initial estimates
    /// are kept throughout training.
    #[config(default = "true")]
    pub update_bn_estimate: bool,
}

/// A CNN block with Conv2d, BatchNorm, ReLU and MaxPool.
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        bn_momentum: f64,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels)
            .with_momentum(bn_momentum)
            .init(device);

        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }

    /// Freeze the normalization parameters of this block only.
    fn with_frozen_norm(mut self) -> Self {
        self.bn = self.bn.no_grad();
        self
    }
}

/// Per-head softmax probabilities.
#[derive(Clone, Debug)]
pub struct FaceOutput<B: Backend> {
    /// [batch, 7] ethnicity probabilities
    pub race: Tensor<B, 2>,
    /// [batch, 2] gender probabilities
    pub gender: Tensor<B, 2>,
}

/// Face attribute classifier.
///
/// Architecture:
/// - 4 convolutional blocks with doubling filter counts
/// - Global average pooling
/// - Dropout, then one linear head per attribute with softmax output
#[derive(Module, Debug)]
pub struct FaceClassifier<B: Backend> {
    pub conv1: ConvBlock<B>,
    pub conv2: ConvBlock<B>,
    pub conv3: ConvBlock<B>,
    pub conv4: ConvBlock<B>,

    pub global_pool: AdaptiveAvgPool2d,

    pub dropout: Dropout,
    pub fc_race: Linear<B>,
    pub fc_gender: Linear<B>,
}

impl<B: Backend> FaceClassifier<B> {
    pub fn new(config: &FaceClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;
        let momentum = if config.update_bn_estimate { 0.1 } else { 0.0 };

        let conv1 = ConvBlock::new(config.in_channels, base, 3, momentum, device);
        let conv2 = ConvBlock::new(base, base * 2, 3, momentum, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, 3, momentum, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, 3, momentum, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc_race = LinearConfig::new(base * 8, config.num_race_classes).init(device);
        let fc_gender = LinearConfig::new(base * 8, config.num_gender_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool,
            dropout,
            fc_race,
            fc_gender,
        }
    }

    /// Forward pass. The backbone runs once; both heads share its features.
    pub fn forward(&self, x: Tensor<B, 4>) -> FaceOutput<B> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        // [B, C, H, W] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let features = self.dropout.forward(x.reshape([batch_size, channels]));

        let race = burn::tensor::activation::softmax(self.fc_race.forward(features.clone()), 1);
        let gender = burn::tensor::activation::softmax(self.fc_gender.forward(features), 1);

        FaceOutput { race, gender }
    }

    /// Restrict training to the named sub-modules; everything else is
    /// detached from the gradient tape. An empty list trains everything.
    pub fn with_trainable_layers(self, layers: &[String]) -> crate::error::Result<Self> {
        if layers.is_empty() {
            return Ok(self);
        }

        for layer in layers {
            if !LAYER_NAMES.contains(&layer.as_str()) {
                return Err(Error::Config(format!(
                    "unknown layer '{}' (known: {})",
                    layer,
                    LAYER_NAMES.join(", ")
                )));
            }
        }

        let frozen = |name: &str| !layers.iter().any(|l| l == name);
        let mut model = self;
        if frozen("conv1") {
            model.conv1 = model.conv1.no_grad();
        }
        if frozen("conv2") {
            model.conv2 = model.conv2.no_grad();
        }
        if frozen("conv3") {
            model.conv3 = model.conv3.no_grad();
        }
        if frozen("conv4") {
            model.conv4 = model.conv4.no_grad();
        }
        if frozen("fc_race") {
            model.fc_race = model.fc_race.no_grad();
        }
        if frozen("fc_gender") {
            model.fc_gender = model.fc_gender.no_grad();
        }
        Ok(model)
    }

    /// Freeze the scale/shift parameters of every normalization layer while
    /// leaving the rest of each block trainable.
    pub fn with_frozen_norm_params(mut self) -> Self {
        self.conv1 = self.conv1.with_frozen_norm();
        self.conv2 = self.conv2.with_frozen_norm();
        self.conv3 = self.conv3.with_frozen_norm();
        self.conv4 = self.conv4.with_frozen_norm();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{NUM_GENDER_CLASSES, NUM_RACE_CLASSES};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_output_shapes() {
        let device = Default::default();
        let config = FaceClassifierConfig::new();
        let model = FaceClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.race.dims(), [2, NUM_RACE_CLASSES]);
        assert_eq!(output.gender.dims(), [2, NUM_GENDER_CLASSES]);
    }

    #[test]
    fn test_heads_output_probabilities() {
        let device = Default::default();
        let config = FaceClassifierConfig::new();
        let model = FaceClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::random(
            [2, 3, 32, 32],
            burn::tensor::Distribution::Default,
            &device,
        );
        let output = model.forward(input);

        let race: Vec<f32> = output.race.into_data().to_vec().unwrap();
        for row in race.chunks(NUM_RACE_CLASSES) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4, "softmax row sums to {}", sum);
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_unknown_trainable_layer_is_rejected() {
        let device = Default::default();
        let config = FaceClassifierConfig::new();
        let model = FaceClassifier::<TestBackend>::new(&config, &device);

        let result = model.with_trainable_layers(&["conv9".to_string()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_partial_freeze_still_runs_forward() {
        let device = Default::default();
        let config = FaceClassifierConfig::new();
        let model = FaceClassifier::<TestBackend>::new(&config, &device)
            .with_trainable_layers(&["conv4".to_string(), "fc_gender".to_string()])
            .unwrap()
            .with_frozen_norm_params();

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        let output = model.forward(input);
        assert_eq!(output.gender.dims(), [1, NUM_GENDER_CLASSES]);
    }

    #[test]
    fn test_freeze_presets() {
        assert!(freeze_preset("all").unwrap().is_empty());
        assert_eq!(
            freeze_preset("upper").unwrap(),
            vec!["conv3", "conv4", "fc_race", "fc_gender"]
        );
        assert_eq!(freeze_preset("heads").unwrap(), vec!["fc_race", "fc_gender"]);
    }

    #[test]
    fn test_unknown_freeze_preset_is_rejected() {
        assert!(matches!(
            freeze_preset("lower"),
            Err(crate::error::Error::Config(_))
        ));
    }
}
