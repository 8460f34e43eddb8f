//! The eight member architectures and their training recipes

use burn::tensor::backend::Backend;

use super::classifier::Classifier;
use super::spec::{ClassifierSpec, KernelInit, LayerSpec, Padding};
use crate::training::config::OptimizerSpec;
use crate::utils::error::Result;

/// An architecture together with the optimizer it is trained with
#[derive(Debug, Clone, PartialEq)]
pub struct ZooEntry {
    pub spec: ClassifierSpec,
    pub optimizer: OptimizerSpec,
    /// Fewer steps per epoch than the pipeline default
    pub steps_per_epoch: Option<usize>,
}

impl ZooEntry {
    fn new(spec: ClassifierSpec, optimizer: OptimizerSpec) -> Self {
        Self {
            spec,
            optimizer,
            steps_per_epoch: None,
        }
    }
}

fn three_block_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::conv(16, 3),
        LayerSpec::max_pool(2),
        LayerSpec::conv(32, 3),
        LayerSpec::max_pool(2),
        LayerSpec::conv(64, 3),
        LayerSpec::max_pool(2),
        LayerSpec::Flatten,
        LayerSpec::dense(64),
        LayerSpec::sigmoid_output(),
    ]
}

pub fn three_block() -> ClassifierSpec {
    ClassifierSpec::new("three_block", three_block_layers())
}

pub fn batchnorm_dropout() -> ClassifierSpec {
    use KernelInit::*;
    ClassifierSpec::new(
        "batchnorm_dropout",
        vec![
            LayerSpec::conv_with(32, 3, Padding::Valid, HeNormal),
            LayerSpec::BatchNorm,
            LayerSpec::dropout(0.2),
            LayerSpec::max_pool(2),
            LayerSpec::conv_with(64, 3, Padding::Valid, GlorotNormal),
            LayerSpec::BatchNorm,
            LayerSpec::dropout(0.2),
            LayerSpec::max_pool(2),
            LayerSpec::conv_with(128, 2, Padding::Valid, RandomNormal),
            LayerSpec::BatchNorm,
            LayerSpec::dropout(0.2),
            LayerSpec::Flatten,
            LayerSpec::dense(64),
            LayerSpec::dense(128),
            LayerSpec::sigmoid_output(),
        ],
    )
}

pub fn wide_three_block() -> ClassifierSpec {
    ClassifierSpec::new(
        "wide_three_block",
        vec![
            LayerSpec::conv(40, 3),
            LayerSpec::max_pool(2),
            LayerSpec::conv(80, 3),
            LayerSpec::max_pool(2),
            LayerSpec::conv(150, 3),
            LayerSpec::max_pool(2),
            LayerSpec::Flatten,
            LayerSpec::dense(700),
            LayerSpec::sigmoid_output(),
        ],
    )
}

pub fn five_block_same() -> ClassifierSpec {
    use KernelInit::*;
    ClassifierSpec::new(
        "five_block_same",
        vec![
            LayerSpec::conv_with(20, 3, Padding::Valid, LecunUniform),
            LayerSpec::max_pool(2),
            LayerSpec::conv_with(60, 3, Padding::Same, LecunUniform),
            LayerSpec::max_pool(2),
            LayerSpec::conv_with(100, 3, Padding::Same, GlorotUniform),
            LayerSpec::max_pool(2),
            LayerSpec::dropout(0.3),
            LayerSpec::conv_with(160, 3, Padding::Same, GlorotUniform),
            LayerSpec::max_pool(3),
            LayerSpec::dropout(0.6),
            LayerSpec::conv_with(200, 3, Padding::Same, GlorotUniform),
            LayerSpec::max_pool(3),
            LayerSpec::Flatten,
            LayerSpec::dense(616),
            LayerSpec::sigmoid_output(),
        ],
    )
}

pub fn mixed_kernel() -> ClassifierSpec {
    use KernelInit::HeNormal;
    ClassifierSpec::new(
        "mixed_kernel",
        vec![
            LayerSpec::conv_with(64, 2, Padding::Valid, HeNormal),
            LayerSpec::max_pool(2),
            LayerSpec::conv_with(64, 3, Padding::Valid, HeNormal),
            LayerSpec::max_pool(2),
            LayerSpec::conv_with(64, 4, Padding::Valid, HeNormal),
            LayerSpec::avg_pool(2),
            LayerSpec::max_pool(2),
            LayerSpec::Flatten,
            LayerSpec::dense(512),
            LayerSpec::sigmoid_output(),
        ],
    )
}

/// Same table as [`three_block`], trained with plain SGD
pub fn three_block_sgd() -> ClassifierSpec {
    ClassifierSpec::new("three_block_sgd", three_block_layers())
}

pub fn narrow_three_block() -> ClassifierSpec {
    ClassifierSpec::new(
        "narrow_three_block",
        vec![
            LayerSpec::conv(4, 3),
            LayerSpec::max_pool(2),
            LayerSpec::conv(8, 3),
            LayerSpec::max_pool(2),
            LayerSpec::conv(16, 3),
            LayerSpec::max_pool(2),
            LayerSpec::Flatten,
            LayerSpec::dense(128),
            LayerSpec::sigmoid_output(),
        ],
    )
}

pub fn large_kernel() -> ClassifierSpec {
    ClassifierSpec::new(
        "large_kernel",
        vec![
            LayerSpec::conv(5, 9),
            LayerSpec::max_pool(2),
            LayerSpec::conv(30, 4),
            LayerSpec::max_pool(2),
            LayerSpec::conv(11, 2),
            LayerSpec::max_pool(2),
            LayerSpec::Flatten,
            LayerSpec::dense(128),
            LayerSpec::sigmoid_output(),
        ],
    )
}

/// Table indices of [`model_zoo`] in the order the members are trained
///
/// Ensemble members stay in table order. Under a carried stream cursor the
/// training order decides which batches each run starts from.
pub const TRAINING_ORDER: [usize; 8] = [0, 1, 2, 4, 5, 3, 6, 7];

/// All eight architectures with their recipes, in ensemble (table) order
pub fn model_zoo() -> Vec<ZooEntry> {
    vec![
        ZooEntry::new(three_block(), OptimizerSpec::adadelta(1.0, 0.95)),
        ZooEntry::new(batchnorm_dropout(), OptimizerSpec::adam(0.001)),
        ZooEntry::new(wide_three_block(), OptimizerSpec::rmsprop(0.0001)),
        ZooEntry::new(five_block_same(), OptimizerSpec::rmsprop(0.0008)),
        ZooEntry::new(mixed_kernel(), OptimizerSpec::rmsprop(0.003)),
        ZooEntry::new(three_block_sgd(), OptimizerSpec::sgd(0.01)),
        ZooEntry::new(narrow_three_block(), OptimizerSpec::rmsprop(0.001)),
        ZooEntry {
            steps_per_epoch: Some(95),
            ..ZooEntry::new(large_kernel(), OptimizerSpec::adamax(0.003, 0.9, 0.999))
        },
    ]
}

/// Zoo entries paired with their table index, in training order
pub fn training_schedule() -> Vec<(usize, ZooEntry)> {
    let zoo = model_zoo();
    TRAINING_ORDER
        .iter()
        .filter_map(|&index| zoo.get(index).cloned().map(|entry| (index, entry)))
        .collect()
}

/// The eight architectures without recipes
pub fn classifier_specs() -> Vec<ClassifierSpec> {
    model_zoo().into_iter().map(|entry| entry.spec).collect()
}

/// Build a fresh, independently initialized classifier for every spec
pub fn build_classifiers<B: Backend>(device: &B::Device) -> Result<Vec<Classifier<B>>> {
    classifier_specs()
        .iter()
        .map(|spec| spec.init(device))
        .collect()
}
