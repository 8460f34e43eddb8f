//! Training configuration
//!
//! Per-run settings ([`TrainingConfig`]) and the settings of a whole
//! pipeline run ([`RunConfig`]), both serializable with serde.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::{self, CursorPolicy};
use crate::utils::error::{EnsembleError, Result};
use crate::{DEFAULT_BATCH_SIZE, DEFAULT_EPOCHS};

/// Keras' default fuzz factor
pub const DEFAULT_EPSILON: f64 = 1e-7;

/// Optimizer identity and hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerSpec {
    Adadelta {
        learning_rate: f64,
        rho: f64,
        epsilon: f64,
    },
    Adam {
        learning_rate: f64,
        beta_1: f64,
        beta_2: f64,
        epsilon: f64,
    },
    Adamax {
        learning_rate: f64,
        beta_1: f64,
        beta_2: f64,
        epsilon: f64,
    },
    #[serde(rename = "rmsprop")]
    RmsProp {
        learning_rate: f64,
        rho: f64,
        epsilon: f64,
    },
    Sgd {
        learning_rate: f64,
    },
}

impl OptimizerSpec {
    pub fn adadelta(learning_rate: f64, rho: f64) -> Self {
        OptimizerSpec::Adadelta {
            learning_rate,
            rho,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn adam(learning_rate: f64) -> Self {
        OptimizerSpec::Adam {
            learning_rate,
            beta_1: 0.9,
            beta_2: 0.999,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn adamax(learning_rate: f64, beta_1: f64, beta_2: f64) -> Self {
        OptimizerSpec::Adamax {
            learning_rate,
            beta_1,
            beta_2,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn rmsprop(learning_rate: f64) -> Self {
        OptimizerSpec::RmsProp {
            learning_rate,
            rho: 0.9,
            epsilon: DEFAULT_EPSILON,
        }
    }

    pub fn sgd(learning_rate: f64) -> Self {
        OptimizerSpec::Sgd { learning_rate }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            OptimizerSpec::Adadelta { learning_rate, .. }
            | OptimizerSpec::Adam { learning_rate, .. }
            | OptimizerSpec::Adamax { learning_rate, .. }
            | OptimizerSpec::RmsProp { learning_rate, .. }
            | OptimizerSpec::Sgd { learning_rate } => *learning_rate,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OptimizerSpec::Adadelta { .. } => "Adadelta",
            OptimizerSpec::Adam { .. } => "Adam",
            OptimizerSpec::Adamax { .. } => "Adamax",
            OptimizerSpec::RmsProp { .. } => "RMSprop",
            OptimizerSpec::Sgd { .. } => "SGD",
        }
    }

    pub fn validate(&self) -> Result<()> {
        let lr = self.learning_rate();
        if !lr.is_finite() || lr <= 0.0 {
            return Err(EnsembleError::Config(format!(
                "{} learning rate must be positive, got {}",
                self.name(),
                lr
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for OptimizerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(lr={})", self.name(), self.learning_rate())
    }
}

/// Settings of one training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub optimizer: OptimizerSpec,
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
}

impl TrainingConfig {
    pub fn new(optimizer: OptimizerSpec) -> Self {
        Self {
            optimizer,
            epochs: DEFAULT_EPOCHS,
            steps_per_epoch: 100,
            validation_steps: 50,
        }
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_steps(mut self, steps_per_epoch: usize, validation_steps: usize) -> Self {
        self.steps_per_epoch = steps_per_epoch;
        self.validation_steps = validation_steps;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.optimizer.validate()?;
        if self.epochs == 0 {
            return Err(EnsembleError::Config("epochs must be positive".into()));
        }
        if self.steps_per_epoch == 0 {
            return Err(EnsembleError::Config("steps per epoch must be positive".into()));
        }
        if self.validation_steps == 0 {
            return Err(EnsembleError::Config("validation steps must be positive".into()));
        }
        Ok(())
    }
}

/// Settings of a full pipeline run: eight classifiers, then the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub train_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub output_dir: PathBuf,
    pub batch_size: usize,
    /// Epochs for every run, classifiers and ensemble alike
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub validation_steps: usize,
    /// Shuffle both streams at the start of every pass
    pub shuffle: bool,
    pub seed: u64,
    pub cursor_policy: CursorPolicy,
    /// Keep member parameters fixed while the ensemble trains
    pub freeze_members: bool,
    /// Decode every image up front instead of per batch
    pub preload: bool,
    pub ensemble_optimizer: OptimizerSpec,
}

impl Default for RunConfig {
    fn default() -> Self {
        let base = PathBuf::from("data/cats_and_dogs_filtered");
        Self {
            train_dir: dataset::train_dir(&base),
            validation_dir: dataset::validation_dir(&base),
            output_dir: PathBuf::from("output"),
            batch_size: DEFAULT_BATCH_SIZE,
            epochs: DEFAULT_EPOCHS,
            steps_per_epoch: 100,
            validation_steps: 50,
            shuffle: true,
            seed: 42,
            cursor_policy: CursorPolicy::default(),
            freeze_members: false,
            preload: false,
            ensemble_optimizer: OptimizerSpec::rmsprop(0.001),
        }
    }
}

impl RunConfig {
    /// Default settings reading `train/` and `validation/` under `base_dir`
    pub fn from_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            train_dir: dataset::train_dir(&base_dir),
            validation_dir: dataset::validation_dir(&base_dir),
            ..Default::default()
        }
    }

    /// Training settings for one run
    ///
    /// `steps_override` lowers the steps per epoch for recipes that ask for
    /// fewer steps than the pipeline default; it never raises them.
    pub fn training_config(
        &self,
        optimizer: OptimizerSpec,
        steps_override: Option<usize>,
    ) -> TrainingConfig {
        let steps = steps_override
            .map(|steps| steps.min(self.steps_per_epoch))
            .unwrap_or(self.steps_per_epoch);

        TrainingConfig::new(optimizer)
            .with_epochs(self.epochs)
            .with_steps(steps, self.validation_steps)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EnsembleError::Config("batch size must be positive".into()));
        }
        self.training_config(self.ensemble_optimizer.clone(), None)
            .validate()
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.epochs, 15);
        assert_eq!(config.steps_per_epoch, 100);
        assert_eq!(config.validation_steps, 50);
        assert_eq!(config.cursor_policy, CursorPolicy::ResetPerRun);
        assert!(!config.freeze_members);
        assert_eq!(config.ensemble_optimizer, OptimizerSpec::rmsprop(0.001));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_steps_override_only_lowers() {
        let config = RunConfig::default();
        assert_eq!(config.training_config(OptimizerSpec::sgd(0.01), Some(95)).steps_per_epoch, 95);

        let short = RunConfig {
            steps_per_epoch: 1,
            ..Default::default()
        };
        assert_eq!(short.training_config(OptimizerSpec::sgd(0.01), Some(95)).steps_per_epoch, 1);
    }

    #[test]
    fn test_json_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("run_config.json");

        let config = RunConfig {
            seed: 7,
            cursor_policy: CursorPolicy::Carry,
            ..RunConfig::from_base_dir("/data/cats_and_dogs")
        };
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.train_dir, PathBuf::from("/data/cats_and_dogs/train"));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig = serde_json::from_str(r#"{"epochs": 3}"#).unwrap();
        assert_eq!(config.epochs, 3);
        assert_eq!(config.batch_size, 20);
    }

    #[test]
    fn test_optimizer_tagging() {
        let json = serde_json::to_string(&OptimizerSpec::rmsprop(0.0008)).unwrap();
        assert!(json.contains("\"kind\":\"rmsprop\""));

        let spec: OptimizerSpec =
            serde_json::from_str(r#"{"kind":"sgd","learning_rate":0.01}"#).unwrap();
        assert_eq!(spec, OptimizerSpec::sgd(0.01));
    }

    #[test]
    fn test_invalid_training_config() {
        let config = TrainingConfig::new(OptimizerSpec::adam(0.001)).with_epochs(0);
        assert!(matches!(config.validate(), Err(EnsembleError::Config(_))));

        let config = TrainingConfig::new(OptimizerSpec::sgd(-1.0));
        assert!(config.validate().is_err());
    }
}
