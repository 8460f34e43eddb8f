//! End-to-end run: eight classifiers, then the ensemble built from them
//!
//! Runs are strictly sequential and share one training and one
//! validation stream. Artifacts land in `RunConfig::output_dir`.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::{AutodiffBackend, Backend},
};
use tracing::info;

use super::config::RunConfig;
use super::history::{save_histories_csv, save_histories_json, TrainingHistory};
use super::orchestrator::train_with_config;
use crate::dataset::{CursorPolicy, ImageBatchStream, ImageFolder, InMemoryImageDataset};
use crate::model::{build_classifiers, classifier_specs, training_schedule, Classifier, EnsembleComposite};
use crate::report::write_diagrams;
use crate::utils::error::{EnsembleError, Result};
use crate::utils::format_duration;
use crate::IMAGE_SIZE;

/// File stem of the saved ensemble (the recorder appends `.mpk`)
pub const ENSEMBLE_FILE_STEM: &str = "ensemble_model";

/// Name of the ensemble run in histories
pub const ENSEMBLE_RUN_NAME: &str = "ensemble";

/// Outcome of a pipeline run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// One history per classifier in training order, then the ensemble's
    pub histories: Vec<TrainingHistory>,
    pub artifacts: Vec<PathBuf>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn ensemble_history(&self) -> Option<&TrainingHistory> {
        self.histories.last()
    }
}

/// Open the training and validation streams described by a run config
///
/// Both streams follow `config.shuffle`; the training stream is seeded
/// with `seed`, the validation stream with `seed + 1`.
pub fn open_streams(config: &RunConfig) -> Result<(ImageBatchStream, ImageBatchStream)> {
    let train_folder = ImageFolder::open(&config.train_dir, IMAGE_SIZE)?;
    let valid_folder = ImageFolder::open(&config.validation_dir, IMAGE_SIZE)?;

    if train_folder.is_empty() || valid_folder.is_empty() {
        return Err(EnsembleError::Dataset(format!(
            "no images found ({} training, {} validation)",
            train_folder.len(),
            valid_folder.len()
        )));
    }

    let train_seed = config.seed;
    let valid_seed = config.seed.wrapping_add(1);

    if config.preload {
        let train = InMemoryImageDataset::preload(&train_folder)?;
        let valid = InMemoryImageDataset::preload(&valid_folder)?;
        Ok((
            ImageBatchStream::new("train", train, config.batch_size, config.shuffle, train_seed)?,
            ImageBatchStream::new("validation", valid, config.batch_size, config.shuffle, valid_seed)?,
        ))
    } else {
        Ok((
            ImageBatchStream::new("train", train_folder, config.batch_size, config.shuffle, train_seed)?,
            ImageBatchStream::new("validation", valid_folder, config.batch_size, config.shuffle, valid_seed)?,
        ))
    }
}

fn prepare_streams(policy: CursorPolicy, train: &mut ImageBatchStream, valid: &mut ImageBatchStream) {
    if policy == CursorPolicy::ResetPerRun {
        train.reset();
        valid.reset();
    }
}

/// Train all eight classifiers and the ensemble, then persist the results
pub fn run_pipeline<B: AutodiffBackend>(config: &RunConfig, device: &B::Device) -> Result<RunSummary> {
    config.validate()?;
    let start = Instant::now();

    std::fs::create_dir_all(&config.output_dir)?;
    let (mut train, mut valid) = open_streams(config)?;

    info!(
        "Streams ready: {} training images ({} batches/pass), {} validation images",
        train.len(),
        train.batches_per_pass(),
        valid.len()
    );

    let schedule = training_schedule();
    let mut trained: Vec<Option<Classifier<B>>> = (0..schedule.len()).map(|_| None).collect();
    let mut histories = Vec::with_capacity(schedule.len() + 1);

    for (run, (index, entry)) in schedule.iter().enumerate() {
        info!("Model {}/{}: {}", run + 1, schedule.len(), entry.spec.name);
        prepare_streams(config.cursor_policy, &mut train, &mut valid);

        let model = entry.spec.init::<B>(device)?;
        let training = config.training_config(entry.optimizer.clone(), entry.steps_per_epoch);
        let (model, history) =
            train_with_config(model, &entry.spec.name, &training, &mut train, &mut valid, device)?;

        if let Some(slot) = trained.get_mut(*index) {
            *slot = Some(model);
        }
        histories.push(history);
    }

    let members = trained
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| EnsembleError::Training("training schedule left a member untrained".into()))?;
    let mut ensemble = EnsembleComposite::compose(members, device)?;
    if config.freeze_members {
        info!("Member parameters frozen for ensemble training");
        ensemble = ensemble.freeze_members();
    }

    prepare_streams(config.cursor_policy, &mut train, &mut valid);
    let training = config.training_config(config.ensemble_optimizer.clone(), None);
    let (ensemble, history) =
        train_with_config(ensemble, ENSEMBLE_RUN_NAME, &training, &mut train, &mut valid, device)?;
    histories.push(history);

    let artifacts = save_artifacts(&ensemble, &histories, config)?;
    let elapsed_secs = start.elapsed().as_secs_f64();
    info!("Pipeline finished in {}", format_duration(elapsed_secs));

    Ok(RunSummary {
        histories,
        artifacts,
        elapsed_secs,
    })
}

fn save_artifacts<B: Backend>(
    ensemble: &EnsembleComposite<B>,
    histories: &[TrainingHistory],
    config: &RunConfig,
) -> Result<Vec<PathBuf>> {
    let dir = &config.output_dir;
    let mut artifacts = Vec::new();

    artifacts.push(save_ensemble(ensemble, &dir.join(ENSEMBLE_FILE_STEM))?);

    let json_path = dir.join("histories.json");
    save_histories_json(histories, &json_path)?;
    artifacts.push(json_path);

    let csv_path = dir.join("histories.csv");
    save_histories_csv(histories, &csv_path)?;
    artifacts.push(csv_path);

    let config_path = dir.join("run_config.json");
    config.save(&config_path)?;
    artifacts.push(config_path);

    let diagrams = write_diagrams(&classifier_specs(), dir)?;
    artifacts.extend([diagrams.full, diagrams.titled, diagrams.partial]);

    for path in &artifacts {
        info!("  Saved {:?}", path);
    }
    Ok(artifacts)
}

/// Save an ensemble with the compact recorder, returning the written path
pub fn save_ensemble<B: Backend>(ensemble: &EnsembleComposite<B>, file_stem: &Path) -> Result<PathBuf> {
    let recorder = CompactRecorder::new();
    ensemble
        .clone()
        .save_file(file_stem, &recorder)
        .map_err(|e| EnsembleError::Recorder(format!("Failed to save ensemble: {:?}", e)))?;
    Ok(file_stem.with_extension("mpk"))
}

/// Rebuild the ensemble structure and load saved weights into it
pub fn load_ensemble<B: Backend>(file_stem: &Path, device: &B::Device) -> Result<EnsembleComposite<B>> {
    let members = build_classifiers::<B>(device)?;
    let recorder = CompactRecorder::new();
    EnsembleComposite::compose(members, device)?
        .load_file(file_stem, &recorder, device)
        .map_err(|e| EnsembleError::Recorder(format!("Failed to load ensemble: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::test_support::write_split;
    use crate::dataset::{train_dir, validation_dir};
    use crate::model::ScalarClassifier;
    use crate::training::history::load_histories_json;
    use burn::backend::Autodiff;
    use burn::tensor::{Distribution, Tensor};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn dataset_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        write_split(&train_dir(temp_dir.path()), &[("cats", 2), ("dogs", 2)], 16);
        write_split(&validation_dir(temp_dir.path()), &[("cats", 1), ("dogs", 1)], 16);
        temp_dir
    }

    #[test]
    fn test_open_streams() {
        let data = dataset_dir();
        let config = RunConfig {
            batch_size: 3,
            ..RunConfig::from_base_dir(data.path())
        };

        let (train, valid) = open_streams(&config).unwrap();
        assert_eq!(train.len(), 4);
        assert_eq!(train.batches_per_pass(), 2);
        assert_eq!(valid.len(), 2);
        assert_eq!(train.image_size(), IMAGE_SIZE);
        assert!(train.is_shuffled());
        assert!(valid.is_shuffled());
    }

    #[test]
    fn test_unshuffled_config_applies_to_both_streams() {
        let data = dataset_dir();
        let config = RunConfig {
            shuffle: false,
            ..RunConfig::from_base_dir(data.path())
        };

        let (mut train, mut valid) = open_streams(&config).unwrap();
        assert!(!train.is_shuffled());
        assert!(!valid.is_shuffled());
        assert_eq!(valid.next_indices(), vec![0, 1]);
    }

    #[test]
    fn test_open_streams_missing_split() {
        let temp_dir = TempDir::new().unwrap();
        write_split(&train_dir(temp_dir.path()), &[("cats", 1), ("dogs", 1)], 16);

        let config = RunConfig::from_base_dir(temp_dir.path());
        assert!(open_streams(&config).is_err());
    }

    #[test]
    fn test_reset_policy_rewinds_streams() {
        let data = dataset_dir();
        let config = RunConfig {
            batch_size: 3,
            ..RunConfig::from_base_dir(data.path())
        };
        let (mut train, mut valid) = open_streams(&config).unwrap();
        train.next_indices();
        valid.next_indices();

        prepare_streams(CursorPolicy::Carry, &mut train, &mut valid);
        assert_eq!(train.position().offset, 3);

        prepare_streams(CursorPolicy::ResetPerRun, &mut train, &mut valid);
        assert_eq!(train.position().offset, 0);
        assert_eq!(valid.position().pass, 0);
    }

    #[test]
    fn test_save_and_load_ensemble() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let ensemble =
            EnsembleComposite::compose(build_classifiers::<TestBackend>(&device).unwrap(), &device)
                .unwrap();

        let stem = temp_dir.path().join(ENSEMBLE_FILE_STEM);
        let path = save_ensemble(&ensemble, &stem).unwrap();
        assert!(path.exists());

        let loaded = load_ensemble::<TestBackend>(&stem, &device).unwrap();
        let input = Tensor::<TestBackend, 4>::random([1, 3, 150, 150], Distribution::Default, &device);
        let expected: Vec<f32> = ensemble.forward(input.clone()).into_data().to_vec().unwrap();
        let actual: Vec<f32> = loaded.try_forward(input).unwrap().into_data().to_vec().unwrap();

        // Half-precision records
        assert!((expected[0] - actual[0]).abs() < 1e-2);
    }

    #[test]
    #[ignore = "trains all nine models at full resolution"]
    fn test_full_pipeline_smoke() {
        let data = dataset_dir();
        let output = TempDir::new().unwrap();
        let config = RunConfig {
            output_dir: output.path().to_path_buf(),
            batch_size: 2,
            epochs: 1,
            steps_per_epoch: 1,
            validation_steps: 1,
            ..RunConfig::from_base_dir(data.path())
        };

        let device = Default::default();
        let summary = run_pipeline::<Autodiff<TestBackend>>(&config, &device).unwrap();

        assert_eq!(summary.histories.len(), 9);
        assert!(summary.histories.iter().all(|h| h.len() == 1));
        assert_eq!(summary.ensemble_history().unwrap().name, ENSEMBLE_RUN_NAME);
        let trained: Vec<&str> = summary.histories[..8].iter().map(|h| h.name.as_str()).collect();
        assert_eq!(trained[3], "mixed_kernel");
        assert_eq!(trained[5], "five_block_same");
        assert!(summary.artifacts.iter().all(|p| p.exists()));

        let histories = load_histories_json(output.path().join("histories.json")).unwrap();
        assert_eq!(histories, summary.histories);
    }
}
