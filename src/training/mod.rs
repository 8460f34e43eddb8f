//! Training module: configuration, optimizers, the fit loop, histories
//! and the end-to-end pipeline

pub mod config;
pub mod history;
pub mod optim;
pub mod orchestrator;
pub mod pipeline;

pub use config::{OptimizerSpec, RunConfig, TrainingConfig};
pub use history::{EpochMetrics, TrainingHistory};
pub use optim::{Adadelta, AdadeltaConfig, Adamax, AdamaxConfig};
pub use orchestrator::{evaluate, fit, train_with_config};
pub use pipeline::{load_ensemble, open_streams, run_pipeline, save_ensemble, RunSummary};
