//! # Convnet Ensemble
//!
//! Cats-vs-dogs binary image classification with the Burn framework: eight
//! independently trained convolutional classifiers, averaged into one
//! ensemble that carries a trainable dense tail.
//!
//! ## Modules
//!
//! - `dataset`: Image folder scanning, Burn batching and endless batch streams
//! - `model`: Declarative architectures, the eight-member zoo and the ensemble
//! - `training`: Fit loop, optimizers, histories and the end-to-end pipeline
//! - `report`: SVG architecture diagrams
//! - `utils`: Errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use convnet_ensemble::backend::{default_device, TrainingBackend};
//! use convnet_ensemble::training::{run_pipeline, RunConfig};
//!
//! let config = RunConfig::from_base_dir("data/cats_and_dogs_filtered");
//! let summary = run_pipeline::<TrainingBackend>(&config, &default_device())?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod report;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use dataset::{ImageBatch, ImageBatchStream, ImageBatcher, ImageFolder, ImageItem};
pub use model::{Classifier, ClassifierSpec, EnsembleComposite, ScalarClassifier};
pub use training::{run_pipeline, RunConfig, TrainingConfig, TrainingHistory};
pub use utils::error::{EnsembleError, Result};

/// Side length every image is resized to
pub const IMAGE_SIZE: usize = 150;

/// RGB
pub const IMAGE_CHANNELS: usize = 3;

/// Images per batch
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Epochs per training run
pub const DEFAULT_EPOCHS: usize = 15;

/// Number of member classifiers
pub const ENSEMBLE_SIZE: usize = 8;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
