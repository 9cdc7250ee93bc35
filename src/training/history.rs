//! Per-epoch training history, persisted as JSON for later plotting

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{PneumoniaError, Result};
use crate::utils::metrics::BinaryMetrics;

/// Metrics of one split for one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub auc: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, metrics: BinaryMetrics) -> Self {
        Self {
            epoch,
            loss: metrics.loss,
            accuracy: metrics.accuracy,
            auc: metrics.auc,
        }
    }
}

/// Ordered per-epoch metrics for the training and validation splits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train: Vec<EpochMetrics>,
    pub validation: Vec<EpochMetrics>,
    /// Learning rate used during each epoch
    pub learning_rate: Vec<f64>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed epoch
    pub fn record(
        &mut self,
        epoch: usize,
        train: BinaryMetrics,
        validation: BinaryMetrics,
        learning_rate: f64,
    ) {
        self.train.push(EpochMetrics::new(epoch, train));
        self.validation.push(EpochMetrics::new(epoch, validation));
        self.learning_rate.push(learning_rate);
    }

    /// Number of completed epochs
    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    /// Validation entry with the lowest loss (first one on ties)
    pub fn best_validation(&self) -> Option<&EpochMetrics> {
        self.validation.iter().fold(None, |best, m| match best {
            Some(b) if b.loss <= m.loss => Some(b),
            _ => Some(m),
        })
    }

    pub fn train_losses(&self) -> Vec<f64> {
        self.train.iter().map(|m| m.loss).collect()
    }

    pub fn val_losses(&self) -> Vec<f64> {
        self.validation.iter().map(|m| m.loss).collect()
    }

    pub fn train_accuracies(&self) -> Vec<f64> {
        self.train.iter().map(|m| m.accuracy).collect()
    }

    pub fn val_accuracies(&self) -> Vec<f64> {
        self.validation.iter().map(|m| m.accuracy).collect()
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Load a history written by [`TrainingHistory::save`]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PneumoniaError::PathNotFound(path.to_path_buf()));
        }
        let history: Self = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if history.train.len() != history.validation.len() {
            return Err(PneumoniaError::InvalidInput(format!(
                "history {} has {} train entries but {} validation entries",
                path.display(),
                history.train.len(),
                history.validation.len()
            )));
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(loss: f64, accuracy: f64) -> BinaryMetrics {
        BinaryMetrics {
            loss,
            accuracy,
            auc: 0.5,
        }
    }

    #[test]
    fn test_record_and_best() {
        let mut history = TrainingHistory::new();
        assert!(history.best_validation().is_none());

        history.record(1, metrics(0.7, 0.6), metrics(0.65, 0.62), 1e-5);
        history.record(2, metrics(0.5, 0.75), metrics(0.40, 0.80), 1e-5);
        history.record(3, metrics(0.4, 0.82), metrics(0.40, 0.79), 2e-6);

        assert_eq!(history.len(), 3);
        assert_eq!(history.validation.len(), 3);
        assert_eq!(history.learning_rate, vec![1e-5, 1e-5, 2e-6]);
        assert_eq!(history.best_validation().unwrap().epoch, 2);
        assert_eq!(history.val_losses(), vec![0.65, 0.40, 0.40]);
        assert_eq!(history.train_accuracies(), vec![0.6, 0.75, 0.82]);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training_history.json");

        let mut history = TrainingHistory::new();
        history.record(1, metrics(0.69, 0.5), metrics(0.68, 0.55), 1e-4);
        history.save(&path).unwrap();

        let loaded = TrainingHistory::load(&path).unwrap();
        assert_eq!(loaded.train, history.train);
        assert_eq!(loaded.validation, history.validation);
    }

    #[test]
    fn test_load_rejects_mismatched_lengths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(
            &path,
            r#"{"train":[{"epoch":1,"loss":0.5,"accuracy":0.5,"auc":0.5}],"validation":[],"learning_rate":[]}"#,
        )
        .unwrap();

        assert!(TrainingHistory::load(&path).is_err());
    }
}
