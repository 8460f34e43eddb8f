//! Model module: declarative architectures, the classifier they build,
//! the eight-member zoo and the averaging ensemble

pub mod classifier;
pub mod ensemble;
pub mod spec;
pub mod zoo;

pub use classifier::{Classifier, DenseLayer, FeatureLayer, ScalarClassifier};
pub use ensemble::{ensemble_tail_spec, EnsembleComposite};
pub use spec::{
    Activation, ClassifierSpec, FeatureShape, InputShape, KernelInit, LayerSpec, LayerSummary,
    Padding, PoolKind,
};
pub use zoo::{
    build_classifiers, classifier_specs, model_zoo, training_schedule, ZooEntry, TRAINING_ORDER,
};
