//! Declarative classifier architectures
//!
//! A [`ClassifierSpec`] is an ordered table of [`LayerSpec`]s. Shapes are
//! inferred statically from the declared input, so an impossible table
//! (a kernel larger than its feature map, a dense layer before flatten, ...)
//! is rejected before any parameter is allocated.

use std::collections::HashMap;
use std::fmt;

use burn::nn::Initializer;
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use super::classifier::Classifier;
use crate::utils::error::{EnsembleError, Result};
use crate::{IMAGE_CHANNELS, IMAGE_SIZE};

/// Activation applied after a convolution or dense layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    /// Identity
    Linear,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Relu => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Linear => "linear",
        }
    }
}

/// Convolution kernel initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelInit {
    GlorotUniform,
    GlorotNormal,
    HeNormal,
    /// Normal with mean 0 and std 0.05
    RandomNormal,
    LecunUniform,
}

impl KernelInit {
    /// Equivalent Burn initializer
    pub fn to_initializer(&self) -> Initializer {
        match self {
            KernelInit::GlorotUniform => Initializer::XavierUniform { gain: 1.0 },
            KernelInit::GlorotNormal => Initializer::XavierNormal { gain: 1.0 },
            KernelInit::HeNormal => Initializer::KaimingNormal {
                gain: std::f64::consts::SQRT_2,
                fan_out_only: false,
            },
            KernelInit::RandomNormal => Initializer::Normal {
                mean: 0.0,
                std: 0.05,
            },
            // limit = sqrt(3 / fan_in)
            KernelInit::LecunUniform => Initializer::KaimingUniform {
                gain: 1.0,
                fan_out_only: false,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelInit::GlorotUniform => "glorot_uniform",
            KernelInit::GlorotNormal => "glorot_normal",
            KernelInit::HeNormal => "he_normal",
            KernelInit::RandomNormal => "random_normal",
            KernelInit::LecunUniform => "lecun_uniform",
        }
    }
}

/// Convolution padding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    Valid,
    Same,
}

/// Pooling kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Max,
    Average,
}

/// One row of an architecture table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        filters: usize,
        kernel: usize,
        activation: Activation,
        padding: Padding,
        init: KernelInit,
    },
    /// Pooling with stride equal to its size and valid padding
    Pool { kind: PoolKind, size: usize },
    Dropout { rate: f64 },
    BatchNorm,
    Flatten,
    Dense { units: usize, activation: Activation },
    LeakyRelu { slope: f64 },
}

impl LayerSpec {
    /// ReLU convolution, valid padding, Glorot-uniform kernel
    pub fn conv(filters: usize, kernel: usize) -> Self {
        Self::conv_with(filters, kernel, Padding::Valid, KernelInit::GlorotUniform)
    }

    pub fn conv_with(filters: usize, kernel: usize, padding: Padding, init: KernelInit) -> Self {
        LayerSpec::Conv2d {
            filters,
            kernel,
            activation: Activation::Relu,
            padding,
            init,
        }
    }

    pub fn max_pool(size: usize) -> Self {
        LayerSpec::Pool {
            kind: PoolKind::Max,
            size,
        }
    }

    pub fn avg_pool(size: usize) -> Self {
        LayerSpec::Pool {
            kind: PoolKind::Average,
            size,
        }
    }

    pub fn dropout(rate: f64) -> Self {
        LayerSpec::Dropout { rate }
    }

    /// ReLU dense layer
    pub fn dense(units: usize) -> Self {
        LayerSpec::Dense {
            units,
            activation: Activation::Relu,
        }
    }

    /// The single-unit sigmoid output every classifier ends with
    pub fn sigmoid_output() -> Self {
        LayerSpec::Dense {
            units: 1,
            activation: Activation::Sigmoid,
        }
    }

    pub fn leaky_relu(slope: f64) -> Self {
        LayerSpec::LeakyRelu { slope }
    }

    /// Layer kind used in summaries and diagrams
    pub fn kind_name(&self) -> &'static str {
        match self {
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::Pool {
                kind: PoolKind::Max,
                ..
            } => "max_pooling2d",
            LayerSpec::Pool {
                kind: PoolKind::Average,
                ..
            } => "average_pooling2d",
            LayerSpec::Dropout { .. } => "dropout",
            LayerSpec::BatchNorm => "batch_normalization",
            LayerSpec::Flatten => "flatten",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::LeakyRelu { .. } => "leaky_re_lu",
        }
    }

    /// Output shape for a given input shape
    pub fn output_shape(&self, input: FeatureShape) -> std::result::Result<FeatureShape, String> {
        match (self, input) {
            (
                LayerSpec::Conv2d {
                    filters,
                    kernel,
                    padding,
                    ..
                },
                FeatureShape::Map { height, width, .. },
            ) => {
                if *filters == 0 || *kernel == 0 {
                    return Err("convolution needs at least one filter and a positive kernel".into());
                }
                match padding {
                    Padding::Valid => {
                        if *kernel > height || *kernel > width {
                            return Err(format!(
                                "kernel {k}x{k} does not fit a {height}x{width} feature map",
                                k = kernel
                            ));
                        }
                        Ok(FeatureShape::Map {
                            channels: *filters,
                            height: height - kernel + 1,
                            width: width - kernel + 1,
                        })
                    }
                    Padding::Same => {
                        if kernel % 2 == 0 {
                            return Err(format!("same padding needs an odd kernel, got {}", kernel));
                        }
                        Ok(FeatureShape::Map {
                            channels: *filters,
                            height,
                            width,
                        })
                    }
                }
            }
            (LayerSpec::Pool { size, .. }, FeatureShape::Map { channels, height, width }) => {
                if *size == 0 || *size > height || *size > width {
                    return Err(format!(
                        "pool size {} does not fit a {}x{} feature map",
                        size, height, width
                    ));
                }
                Ok(FeatureShape::Map {
                    channels,
                    height: height / size,
                    width: width / size,
                })
            }
            (LayerSpec::Dropout { rate }, shape) => {
                if !(0.0..1.0).contains(rate) {
                    return Err(format!("dropout rate {} outside [0, 1)", rate));
                }
                Ok(shape)
            }
            (LayerSpec::BatchNorm, shape) | (LayerSpec::LeakyRelu { .. }, shape) => Ok(shape),
            (LayerSpec::Flatten, FeatureShape::Map { channels, height, width }) => {
                Ok(FeatureShape::Flat(channels * height * width))
            }
            (LayerSpec::Dense { units, .. }, FeatureShape::Flat(_)) => {
                if *units == 0 {
                    return Err("dense layer needs at least one unit".into());
                }
                Ok(FeatureShape::Flat(*units))
            }
            (LayerSpec::Conv2d { .. }, FeatureShape::Flat(_))
            | (LayerSpec::Pool { .. }, FeatureShape::Flat(_)) => {
                Err(format!("{} after flatten", self.kind_name()))
            }
            (LayerSpec::Flatten, FeatureShape::Flat(_)) => Err("flatten applied twice".into()),
            (LayerSpec::Dense { .. }, FeatureShape::Map { .. }) => {
                Err("dense layer before flatten".into())
            }
        }
    }

    /// Number of parameters for a given input shape
    ///
    /// Batch normalization counts its moving statistics too.
    pub fn param_count(&self, input: FeatureShape) -> usize {
        match (self, input) {
            (LayerSpec::Conv2d { filters, kernel, .. }, FeatureShape::Map { channels, .. }) => {
                kernel * kernel * channels * filters + filters
            }
            (LayerSpec::Dense { units, .. }, FeatureShape::Flat(features)) => {
                features * units + units
            }
            (LayerSpec::BatchNorm, shape) => 4 * shape.channels(),
            _ => 0,
        }
    }
}

/// Declared `(channels, height, width)` of a classifier input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl Default for InputShape {
    fn default() -> Self {
        Self::new(IMAGE_CHANNELS, IMAGE_SIZE, IMAGE_SIZE)
    }
}

impl InputShape {
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Check the dims of a `[N, C, H, W]` batch against this shape
    pub fn check(&self, dims: &[usize]) -> Result<()> {
        if dims.len() != 4 || dims[1..] != self.dims() {
            return Err(EnsembleError::ShapeMismatch {
                expected: self.dims(),
                found: dims.to_vec(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for InputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.channels, self.height, self.width)
    }
}

/// Per-sample shape flowing between layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureShape {
    Map {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat(usize),
}

impl FeatureShape {
    /// Channel count of a map, feature count of a flat vector
    pub fn channels(&self) -> usize {
        match self {
            FeatureShape::Map { channels, .. } => *channels,
            FeatureShape::Flat(features) => *features,
        }
    }
}

impl From<InputShape> for FeatureShape {
    fn from(input: InputShape) -> Self {
        FeatureShape::Map {
            channels: input.channels,
            height: input.height,
            width: input.width,
        }
    }
}

impl fmt::Display for FeatureShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureShape::Map {
                channels,
                height,
                width,
            } => write!(f, "({}, {}, {})", channels, height, width),
            FeatureShape::Flat(features) => write!(f, "({})", features),
        }
    }
}

/// One row of a layer summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSummary {
    /// Keras-style layer name, e.g. `conv2d_2`
    pub name: String,
    pub output: FeatureShape,
    pub params: usize,
}

/// Infer shapes and parameter counts through a layer table
pub fn summarize_layers(
    spec_name: &str,
    layers: &[LayerSpec],
    input: FeatureShape,
) -> Result<Vec<LayerSummary>> {
    let mut counters: HashMap<&'static str, usize> = HashMap::new();
    let mut shape = input;
    let mut rows = Vec::with_capacity(layers.len());

    for (index, layer) in layers.iter().enumerate() {
        let output = layer
            .output_shape(shape)
            .map_err(|reason| EnsembleError::invalid_spec(spec_name, format!("layer {}: {}", index, reason)))?;

        let counter = counters.entry(layer.kind_name()).or_insert(0);
        let name = if *counter == 0 {
            layer.kind_name().to_string()
        } else {
            format!("{}_{}", layer.kind_name(), counter)
        };
        *counter += 1;

        rows.push(LayerSummary {
            name,
            output,
            params: layer.param_count(shape),
        });
        shape = output;
    }

    Ok(rows)
}

/// Print a summary table
pub fn print_summary(title: &str, input: FeatureShape, rows: &[LayerSummary]) {
    println!("Model: \"{}\"", title);
    println!("{:<28} {:<20} {:>12}", "Layer", "Output Shape", "Param #");
    println!("{}", "=".repeat(62));
    println!("{:<28} {:<20} {:>12}", "input", input.to_string(), 0);
    for row in rows {
        println!(
            "{:<28} {:<20} {:>12}",
            row.name,
            row.output.to_string(),
            crate::utils::format_number(row.params)
        );
    }
    println!("{}", "=".repeat(62));
    let total: usize = rows.iter().map(|r| r.params).sum();
    println!("Total params: {}", crate::utils::format_number(total));
    println!();
}

/// A named binary classifier architecture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSpec {
    pub name: String,
    pub input: InputShape,
    pub layers: Vec<LayerSpec>,
}

impl ClassifierSpec {
    /// Spec over the default `(3, 150, 150)` input
    pub fn new(name: &str, layers: Vec<LayerSpec>) -> Self {
        Self {
            name: name.to_string(),
            input: InputShape::default(),
            layers,
        }
    }

    pub fn with_input(mut self, input: InputShape) -> Self {
        self.input = input;
        self
    }

    /// Output shape after every layer
    pub fn output_shapes(&self) -> Result<Vec<FeatureShape>> {
        Ok(self.summary()?.into_iter().map(|row| row.output).collect())
    }

    /// Per-layer output shapes and parameter counts
    pub fn summary(&self) -> Result<Vec<LayerSummary>> {
        summarize_layers(&self.name, &self.layers, self.input.into())
    }

    /// Total parameter count
    pub fn param_count(&self) -> Result<usize> {
        Ok(self.summary()?.iter().map(|row| row.params).sum())
    }

    /// Check that the table builds and ends in a single sigmoid unit
    pub fn validate(&self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(EnsembleError::invalid_spec(&self.name, "no layers"));
        }
        self.summary()?;

        match self.layers.last() {
            Some(LayerSpec::Dense {
                units: 1,
                activation: Activation::Sigmoid,
            }) => Ok(()),
            _ => Err(EnsembleError::invalid_spec(
                &self.name,
                "last layer must be a single-unit sigmoid dense layer",
            )),
        }
    }

    /// Build a fresh classifier with newly initialized parameters
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Classifier<B>> {
        self.validate()?;
        Classifier::from_spec(self, device)
    }
}
