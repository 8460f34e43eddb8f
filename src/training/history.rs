//! Per-epoch training history and its JSON/CSV export

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// Metrics of one finished epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Ordered epoch metrics of one training run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub name: String,
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            epochs: Vec::new(),
        }
    }

    /// Append the metrics of the next epoch
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    pub fn best_val_accuracy(&self) -> f64 {
        self.epochs
            .iter()
            .map(|m| m.val_accuracy)
            .fold(0.0, f64::max)
    }

    /// Series of one metric, in epoch order
    pub fn series(&self, metric: fn(&EpochMetrics) -> f64) -> Vec<f64> {
        self.epochs.iter().map(metric).collect()
    }
}

const CSV_HEADER: &str = "model,epoch,train_loss,train_accuracy,val_loss,val_accuracy";

/// Render histories as one CSV table, epochs numbered from 1
pub fn histories_to_csv(histories: &[TrainingHistory]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for history in histories {
        for m in &history.epochs {
            csv.push_str(&format!(
                "{},{},{:.6},{:.6},{:.6},{:.6}\n",
                history.name,
                m.epoch + 1,
                m.train_loss,
                m.train_accuracy,
                m.val_loss,
                m.val_accuracy
            ));
        }
    }
    csv
}

/// Write histories as pretty JSON
pub fn save_histories_json<P: AsRef<Path>>(histories: &[TrainingHistory], path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(histories)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read histories written by [`save_histories_json`]
pub fn load_histories_json<P: AsRef<Path>>(path: P) -> Result<Vec<TrainingHistory>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write histories as CSV
pub fn save_histories_csv<P: AsRef<Path>>(histories: &[TrainingHistory], path: P) -> Result<()> {
    std::fs::write(path, histories_to_csv(histories))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metrics(epoch: usize, val_accuracy: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 0.69,
            train_accuracy: 0.5,
            val_loss: 0.68,
            val_accuracy,
        }
    }

    #[test]
    fn test_history_is_ordered() {
        let mut history = TrainingHistory::new("three_block");
        history.push(metrics(0, 0.55));
        history.push(metrics(1, 0.71));
        history.push(metrics(2, 0.64));

        assert_eq!(history.len(), 3);
        assert_eq!(history.last().unwrap().epoch, 2);
        assert_eq!(history.best_val_accuracy(), 0.71);
        assert_eq!(history.series(|m| m.val_accuracy), vec![0.55, 0.71, 0.64]);
    }

    #[test]
    fn test_csv_rows() {
        let mut history = TrainingHistory::new("ensemble");
        history.push(metrics(0, 0.5));

        let csv = histories_to_csv(&[history]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "ensemble,1,0.690000,0.500000,0.680000,0.500000");
    }

    #[test]
    fn test_json_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("histories.json");

        let mut history = TrainingHistory::new("large_kernel");
        history.push(metrics(0, 0.6));
        save_histories_json(&[history.clone()], &path).unwrap();

        let loaded = load_histories_json(&path).unwrap();
        assert_eq!(loaded, vec![history]);
    }
}
