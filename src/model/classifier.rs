//! Burn modules built from a [`ClassifierSpec`]
//!
//! Every architecture is a stack of 4D feature layers, a flatten, then a
//! stack of 2D dense layers. Activations are expanded into their own
//! stack entries so one enum per stage covers all eight tables.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, LeakyRelu,
        LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d, Relu, Sigmoid,
    },
    tensor::{backend::Backend, Tensor},
};

use super::spec::{Activation, ClassifierSpec, FeatureShape, InputShape, LayerSpec, Padding, PoolKind};
use crate::utils::error::{EnsembleError, Result};

// Keras BatchNormalization defaults: moving average keeps 0.99 of the old value
const BATCH_NORM_MOMENTUM: f64 = 0.01;
const BATCH_NORM_EPSILON: f64 = 1e-3;

/// A model mapping `[N, C, H, W]` images to `[N, 1]` probabilities
pub trait ScalarClassifier<B: Backend> {
    /// Declared per-sample input shape
    fn input_shape(&self) -> InputShape;

    /// Forward pass without input validation
    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Forward pass that rejects inputs not matching [`Self::input_shape`]
    fn try_forward(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        self.input_shape().check(&images.dims())?;
        Ok(self.forward(images))
    }
}

/// Layer operating on `[N, C, H, W]` feature maps
#[derive(Module, Debug)]
pub enum FeatureLayer<B: Backend> {
    Conv(Conv2d<B>),
    Relu(Relu),
    Sigmoid(Sigmoid),
    LeakyRelu(LeakyRelu),
    MaxPool(MaxPool2d),
    AvgPool(AvgPool2d),
    Dropout(Dropout),
    BatchNorm(BatchNorm<B, 2>),
}

impl<B: Backend> FeatureLayer<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            FeatureLayer::Conv(conv) => conv.forward(x),
            FeatureLayer::Relu(relu) => relu.forward(x),
            FeatureLayer::Sigmoid(sigmoid) => sigmoid.forward(x),
            FeatureLayer::LeakyRelu(leaky) => leaky.forward(x),
            FeatureLayer::MaxPool(pool) => pool.forward(x),
            FeatureLayer::AvgPool(pool) => pool.forward(x),
            FeatureLayer::Dropout(dropout) => dropout.forward(x),
            FeatureLayer::BatchNorm(bn) => bn.forward(x),
        }
    }
}

/// Layer operating on `[N, F]` feature vectors
#[derive(Module, Debug)]
pub enum DenseLayer<B: Backend> {
    Linear(Linear<B>),
    Relu(Relu),
    Sigmoid(Sigmoid),
    LeakyRelu(LeakyRelu),
    Dropout(Dropout),
    BatchNorm(BatchNorm<B, 0>),
}

impl<B: Backend> DenseLayer<B> {
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        match self {
            DenseLayer::Linear(linear) => linear.forward(x),
            DenseLayer::Relu(relu) => relu.forward(x),
            DenseLayer::Sigmoid(sigmoid) => sigmoid.forward(x),
            DenseLayer::LeakyRelu(leaky) => leaky.forward(x),
            DenseLayer::Dropout(dropout) => dropout.forward(x),
            DenseLayer::BatchNorm(bn) => bn.forward(x),
        }
    }
}

/// Build a dense stack starting from `in_features` inputs
///
/// Used for classifier heads and for the ensemble tail.
pub fn build_dense_stack<B: Backend>(
    spec_name: &str,
    layers: &[LayerSpec],
    in_features: usize,
    device: &B::Device,
) -> Result<Vec<DenseLayer<B>>> {
    let mut features = in_features;
    let mut stack = Vec::new();

    for layer in layers {
        match layer {
            LayerSpec::Dense { units, activation } => {
                let linear = LinearConfig::new(features, *units)
                    .with_initializer(Initializer::XavierUniform { gain: 1.0 })
                    .init(device);
                stack.push(DenseLayer::Linear(linear));
                match activation {
                    Activation::Relu => stack.push(DenseLayer::Relu(Relu::new())),
                    Activation::Sigmoid => stack.push(DenseLayer::Sigmoid(Sigmoid::new())),
                    Activation::Linear => {}
                }
                features = *units;
            }
            LayerSpec::Dropout { rate } => {
                stack.push(DenseLayer::Dropout(DropoutConfig::new(*rate).init()));
            }
            LayerSpec::BatchNorm => {
                stack.push(DenseLayer::BatchNorm(batch_norm(features, device)));
            }
            LayerSpec::LeakyRelu { slope } => {
                let leaky = LeakyReluConfig::new().with_negative_slope(*slope).init();
                stack.push(DenseLayer::LeakyRelu(leaky));
            }
            other => {
                return Err(EnsembleError::invalid_spec(
                    spec_name,
                    format!("{} cannot follow flatten", other.kind_name()),
                ));
            }
        }
    }

    Ok(stack)
}

fn batch_norm<B: Backend, const D: usize>(channels: usize, device: &B::Device) -> BatchNorm<B, D> {
    BatchNormConfig::new(channels)
        .with_momentum(BATCH_NORM_MOMENTUM)
        .with_epsilon(BATCH_NORM_EPSILON)
        .init(device)
}

/// A binary image classifier
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    features: Vec<FeatureLayer<B>>,
    head: Vec<DenseLayer<B>>,
    input_channels: usize,
    input_height: usize,
    input_width: usize,
}

impl<B: Backend> Classifier<B> {
    /// Instantiate the layers of a spec
    ///
    /// Expects a validated layer table; see [`ClassifierSpec::init`].
    pub fn from_spec(spec: &ClassifierSpec, device: &B::Device) -> Result<Self> {
        let flatten_at = spec
            .layers
            .iter()
            .position(|layer| matches!(layer, LayerSpec::Flatten))
            .ok_or_else(|| EnsembleError::invalid_spec(&spec.name, "missing flatten layer"))?;

        let mut shape = FeatureShape::from(spec.input);
        let mut features = Vec::new();

        for layer in &spec.layers[..flatten_at] {
            let channels = shape.channels();
            match layer {
                LayerSpec::Conv2d {
                    filters,
                    kernel,
                    activation,
                    padding,
                    init,
                } => {
                    let padding = match padding {
                        Padding::Valid => PaddingConfig2d::Valid,
                        Padding::Same => PaddingConfig2d::Same,
                    };
                    let conv = Conv2dConfig::new([channels, *filters], [*kernel, *kernel])
                        .with_padding(padding)
                        .with_initializer(init.to_initializer())
                        .init(device);
                    features.push(FeatureLayer::Conv(conv));
                    match activation {
                        Activation::Relu => features.push(FeatureLayer::Relu(Relu::new())),
                        Activation::Sigmoid => features.push(FeatureLayer::Sigmoid(Sigmoid::new())),
                        Activation::Linear => {}
                    }
                }
                LayerSpec::Pool { kind, size } => {
                    let layer = match kind {
                        PoolKind::Max => FeatureLayer::MaxPool(
                            MaxPool2dConfig::new([*size, *size])
                                .with_strides([*size, *size])
                                .init(),
                        ),
                        PoolKind::Average => FeatureLayer::AvgPool(
                            AvgPool2dConfig::new([*size, *size])
                                .with_strides([*size, *size])
                                .init(),
                        ),
                    };
                    features.push(layer);
                }
                LayerSpec::Dropout { rate } => {
                    features.push(FeatureLayer::Dropout(DropoutConfig::new(*rate).init()));
                }
                LayerSpec::BatchNorm => {
                    features.push(FeatureLayer::BatchNorm(batch_norm(channels, device)));
                }
                LayerSpec::LeakyRelu { slope } => {
                    let leaky = LeakyReluConfig::new().with_negative_slope(*slope).init();
                    features.push(FeatureLayer::LeakyRelu(leaky));
                }
                LayerSpec::Flatten | LayerSpec::Dense { .. } => {
                    return Err(EnsembleError::invalid_spec(
                        &spec.name,
                        "dense layer before flatten",
                    ));
                }
            }
            shape = layer
                .output_shape(shape)
                .map_err(|reason| EnsembleError::invalid_spec(&spec.name, reason))?;
        }

        let flat = LayerSpec::Flatten
            .output_shape(shape)
            .map_err(|reason| EnsembleError::invalid_spec(&spec.name, reason))?;
        let head = build_dense_stack(&spec.name, &spec.layers[flatten_at + 1..], flat.channels(), device)?;

        Ok(Self {
            features,
            head,
            input_channels: spec.input.channels,
            input_height: spec.input.height,
            input_width: spec.input.width,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `images` - Input tensor of shape [batch_size, 3, height, width]
    ///
    /// # Returns
    /// * Probabilities of shape [batch_size, 1]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;
        for layer in &self.features {
            x = layer.forward(x);
        }

        let mut x: Tensor<B, 2> = x.flatten(1, 3);
        for layer in &self.head {
            x = layer.forward(x);
        }
        x
    }

    /// Declared input shape
    pub fn input_shape(&self) -> InputShape {
        InputShape::new(self.input_channels, self.input_height, self.input_width)
    }

    /// Number of stacked feature layers (activations included)
    pub fn num_feature_layers(&self) -> usize {
        self.features.len()
    }

    /// Number of stacked head layers (activations included)
    pub fn num_head_layers(&self) -> usize {
        self.head.len()
    }
}

impl<B: Backend> ScalarClassifier<B> for Classifier<B> {
    fn input_shape(&self) -> InputShape {
        Classifier::input_shape(self)
    }

    fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        Classifier::forward(self, images)
    }
}
