//! Logging
//!
//! The CLI installs one `tracing` fmt subscriber; the library only emits
//! events. `TrainingLogger` turns epoch metrics into one line per epoch.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::training::history::EpochMetrics;
use crate::utils::error::{EnsembleError, Result};
use crate::utils::format_duration;

/// Subscriber settings
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    /// Print the module path of every event
    pub show_target: bool,
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            show_target: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Debug events with module paths, for `--verbose`
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            show_target: true,
            ..Self::default()
        }
    }
}

/// Install the global subscriber; fails if one is already set
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level)
        .with_target(config.show_target)
        .with_ansi(config.ansi)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| EnsembleError::Config(format!("logging already initialised: {}", e)))
}

/// Epoch-by-epoch progress of one training run
pub struct TrainingLogger {
    run: String,
    epochs: usize,
    started: Instant,
    epoch_started: Instant,
}

impl TrainingLogger {
    pub fn new(run: &str, epochs: usize) -> Self {
        let now = Instant::now();
        Self {
            run: run.to_string(),
            epochs,
            started: now,
            epoch_started: now,
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch_started = Instant::now();
        tracing::debug!(run = %self.run, "epoch {}/{}", epoch + 1, self.epochs);
    }

    /// Seconds left if the remaining epochs take as long as the finished ones
    fn remaining_secs(&self, finished: usize) -> f64 {
        if finished == 0 {
            return 0.0;
        }
        let per_epoch = self.started.elapsed().as_secs_f64() / finished as f64;
        self.epochs.saturating_sub(finished) as f64 * per_epoch
    }

    pub fn end_epoch(&self, metrics: &EpochMetrics) {
        let finished = metrics.epoch + 1;
        tracing::info!(
            run = %self.run,
            "{}/{} ({:.1}s) loss={:.4} accuracy={:.4} val_loss={:.4} val_accuracy={:.4} eta={}",
            finished,
            self.epochs,
            self.epoch_started.elapsed().as_secs_f64(),
            metrics.train_loss,
            metrics.train_accuracy,
            metrics.val_loss,
            metrics.val_accuracy,
            format_duration(self.remaining_secs(finished))
        );
    }

    pub fn log_complete(&self, best_val_accuracy: f64) {
        tracing::info!(
            run = %self.run,
            "done after {} epochs in {}, best val_accuracy={:.4}",
            self.epochs,
            format_duration(self.started.elapsed().as_secs_f64()),
            best_val_accuracy
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_config() {
        let config = LogConfig::verbose();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.show_target);
        assert!(config.ansi);
    }

    #[test]
    fn test_remaining_secs_before_first_epoch() {
        let logger = TrainingLogger::new("three_block", 15);
        assert_eq!(logger.remaining_secs(0), 0.0);
        assert_eq!(logger.remaining_secs(15), 0.0);
    }
}
