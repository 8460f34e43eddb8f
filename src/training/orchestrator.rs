//! Training orchestration
//!
//! Fits one model at a time: a fixed number of training batches per epoch
//! drawn from an endless stream, followed by a validation pass on the
//! inner (non-autodiff) module.

use burn::{
    module::AutodiffModule,
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use tracing::{debug, info};

use super::config::{OptimizerSpec, TrainingConfig};
use super::history::{EpochMetrics, TrainingHistory};
use super::optim::{AdadeltaConfig, AdamaxConfig};
use crate::dataset::ImageBatchStream;
use crate::model::ScalarClassifier;
use crate::utils::error::{EnsembleError, Result};
use crate::utils::logging::TrainingLogger;

/// Probabilities are clipped to `[EPSILON, 1 - EPSILON]` before the log
const EPSILON: f32 = 1e-7;

/// Mean binary cross-entropy of `[N, 1]` probabilities against `[N, 1]` labels
pub fn binary_cross_entropy<B: Backend>(
    probabilities: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let device = probabilities.device();
    BinaryCrossEntropyLossConfig::new()
        .init(&device)
        .forward(probabilities.clamp(EPSILON, 1.0 - EPSILON), targets)
}

/// Number of predictions on the right side of 0.5
pub fn count_correct<B: Backend>(probabilities: Tensor<B, 2>, targets: Tensor<B, 2, Int>) -> usize {
    let correct: i64 = probabilities
        .greater_elem(0.5)
        .int()
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// Abort on a NaN or infinite batch loss; the weights are already unusable
fn ensure_finite_loss(name: &str, epoch: usize, step: usize, loss: f64) -> Result<f64> {
    if loss.is_finite() {
        Ok(loss)
    } else {
        Err(EnsembleError::Training(format!(
            "'{}' diverged: loss {} at epoch {} step {}",
            name,
            loss,
            epoch + 1,
            step + 1
        )))
    }
}

/// Sample-weighted loss and accuracy over several batches
#[derive(Debug, Clone, Copy, Default)]
struct MetricAccumulator {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl MetricAccumulator {
    fn update(&mut self, batch_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += batch_loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
    }

    fn loss(&self) -> f64 {
        self.loss_sum / self.samples.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        self.correct as f64 / self.samples.max(1) as f64
    }
}

/// Evaluate a model on `steps` batches of a stream
///
/// Returns `(loss, accuracy)`. Called with the inner module, so nothing
/// here can update parameters.
pub fn evaluate<B, M>(
    model: &M,
    stream: &mut ImageBatchStream,
    steps: usize,
    device: &B::Device,
) -> Result<(f64, f64)>
where
    B: Backend,
    M: ScalarClassifier<B>,
{
    let mut metrics = MetricAccumulator::default();

    for _ in 0..steps {
        let batch = stream.next_batch::<B>(device)?;
        let batch_size = batch.len();
        let output = model.try_forward(batch.images)?;

        let loss: f64 = binary_cross_entropy(output.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        metrics.update(loss, count_correct(output, batch.targets), batch_size);
    }

    Ok((metrics.loss(), metrics.accuracy()))
}

/// Fit a model with an already initialized optimizer
///
/// Returns the updated model and one history entry per epoch. A batch that
/// does not match the model input, or an image that fails to load, aborts
/// the run.
#[allow(clippy::too_many_arguments)]
pub fn fit<B, M, O>(
    mut model: M,
    optimizer: &mut O,
    learning_rate: f64,
    name: &str,
    config: &TrainingConfig,
    train: &mut ImageBatchStream,
    valid: &mut ImageBatchStream,
    device: &B::Device,
) -> Result<(M, TrainingHistory)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ScalarClassifier<B>,
    M::InnerModule: ScalarClassifier<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    config.validate()?;

    info!(
        "Training '{}' with {} for {} epochs ({} steps, {} validation steps, batch {})",
        name,
        config.optimizer,
        config.epochs,
        config.steps_per_epoch,
        config.validation_steps,
        train.batch_size()
    );

    let mut history = TrainingHistory::new(name);
    let mut logger = TrainingLogger::new(name, config.epochs);

    for epoch in 0..config.epochs {
        logger.start_epoch(epoch);
        let mut metrics = MetricAccumulator::default();

        for step in 0..config.steps_per_epoch {
            let batch = train.next_batch::<B>(device)?;
            let batch_size = batch.len();

            let output = model.try_forward(batch.images)?;
            let loss = binary_cross_entropy(output.clone(), batch.targets.clone());

            let loss_value = ensure_finite_loss(name, epoch, step, loss.clone().into_scalar().elem())?;
            metrics.update(loss_value, count_correct(output, batch.targets), batch_size);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(learning_rate, model, grads);

            if (step + 1) % 10 == 0 {
                debug!(
                    "[{}] step {}/{}: loss = {:.4}, acc = {:.2}%",
                    name,
                    step + 1,
                    config.steps_per_epoch,
                    metrics.loss(),
                    metrics.accuracy() * 100.0
                );
            }
        }

        let (val_loss, val_accuracy) =
            evaluate::<B::InnerBackend, _>(&model.valid(), valid, config.validation_steps, device)?;

        let epoch_metrics = EpochMetrics {
            epoch,
            train_loss: metrics.loss(),
            train_accuracy: metrics.accuracy(),
            val_loss,
            val_accuracy,
        };
        logger.end_epoch(&epoch_metrics);
        history.push(epoch_metrics);
    }

    logger.log_complete(history.best_val_accuracy());
    Ok((model, history))
}

/// Fit a model with the optimizer its configuration names
pub fn train_with_config<B, M>(
    model: M,
    name: &str,
    config: &TrainingConfig,
    train: &mut ImageBatchStream,
    valid: &mut ImageBatchStream,
    device: &B::Device,
) -> Result<(M, TrainingHistory)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + ScalarClassifier<B>,
    M::InnerModule: ScalarClassifier<B::InnerBackend>,
{
    config.validate()?;
    let lr = config.optimizer.learning_rate();

    match &config.optimizer {
        OptimizerSpec::Adadelta { rho, epsilon, .. } => {
            let mut optimizer = AdadeltaConfig::new()
                .with_rho(*rho as f32)
                .with_epsilon(*epsilon as f32)
                .init::<B, M>();
            fit(model, &mut optimizer, lr, name, config, train, valid, device)
        }
        OptimizerSpec::Adam {
            beta_1,
            beta_2,
            epsilon,
            ..
        } => {
            let mut optimizer = AdamConfig::new()
                .with_beta_1(*beta_1 as f32)
                .with_beta_2(*beta_2 as f32)
                .with_epsilon(*epsilon as f32)
                .init::<B, M>();
            fit(model, &mut optimizer, lr, name, config, train, valid, device)
        }
        OptimizerSpec::Adamax {
            beta_1,
            beta_2,
            epsilon,
            ..
        } => {
            let mut optimizer = AdamaxConfig::new()
                .with_beta_1(*beta_1 as f32)
                .with_beta_2(*beta_2 as f32)
                .with_epsilon(*epsilon as f32)
                .init::<B, M>();
            fit(model, &mut optimizer, lr, name, config, train, valid, device)
        }
        OptimizerSpec::RmsProp { rho, epsilon, .. } => {
            let mut optimizer = RmsPropConfig::new()
                .with_alpha(*rho as f32)
                .with_epsilon(*epsilon as f32)
                .with_momentum(0.0)
                .with_centered(false)
                .init::<B, M>();
            fit(model, &mut optimizer, lr, name, config, train, valid, device)
        }
        OptimizerSpec::Sgd { .. } => {
            let mut optimizer = SgdConfig::new().init::<B, M>();
            fit(model, &mut optimizer, lr, name, config, train, valid, device)
        }
    }
}
