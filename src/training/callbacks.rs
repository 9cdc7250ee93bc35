//! Epoch-end monitors keyed on validation loss
//!
//! - [`EarlyStopping`]: stops after `patience` epochs without improvement
//! - [`BestCheckpoint`]: persists the model whenever validation loss reaches a new minimum

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EarlyStoppingConfig;
use crate::model::artifact::save_artifact;
use crate::model::classifier::{ClassifierConfig, PneumoniaClassifier};
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::metrics::BinaryMetrics;

/// Outcome of an early-stopping update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStoppingDecision {
    /// New best epoch; the caller should keep its weights
    Improved,
    /// No improvement for `wait` consecutive epochs
    Waiting { wait: usize },
    /// Patience exhausted
    Stop,
}

/// Early stopping on validation loss
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    restore_best_weights: bool,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(config: &EarlyStoppingConfig) -> Self {
        Self {
            patience: config.patience,
            min_delta: config.min_delta,
            restore_best_weights: config.restore_best_weights,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
        }
    }

    /// Feed the validation loss of `epoch` (0-based)
    pub fn update(&mut self, epoch: usize, val_loss: f64) -> EarlyStoppingDecision {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return EarlyStoppingDecision::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            EarlyStoppingDecision::Stop
        } else {
            EarlyStoppingDecision::Waiting { wait: self.wait }
        }
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn restore_best_weights(&self) -> bool {
        self.restore_best_weights
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// 0-based epoch of the best validation loss so far
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

/// Sidecar metadata written next to every checkpoint save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// 1-based epoch
    pub epoch: usize,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_auc: f64,
    pub learning_rate: f64,
    /// RFC 3339 timestamp
    pub saved_at: String,
}

impl CheckpointRecord {
    pub fn new(epoch: usize, validation: BinaryMetrics, learning_rate: f64) -> Self {
        Self {
            epoch,
            val_loss: validation.loss,
            val_accuracy: validation.accuracy,
            val_auc: validation.auc,
            learning_rate,
            saved_at: Utc::now().to_rfc3339(),
        }
    }

    /// Path of the record for a checkpoint stem
    pub fn path_for(stem: &Path) -> PathBuf {
        let name = stem
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        stem.with_file_name(format!("{}.checkpoint.json", name))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PneumoniaError::PathNotFound(path.to_path_buf()));
        }
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Saves the model only when validation loss is strictly below every previous epoch
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    stem: PathBuf,
    best: f64,
    saves: usize,
}

impl BestCheckpoint {
    pub fn new(stem: impl Into<PathBuf>) -> Self {
        Self {
            stem: stem.into(),
            best: f64::INFINITY,
            saves: 0,
        }
    }

    pub fn stem(&self) -> &Path {
        &self.stem
    }

    /// Lowest validation loss seen so far
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Number of times the checkpoint was written
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Save when `record.val_loss` improves on every previous epoch
    ///
    /// Returns whether the checkpoint was written.
    pub fn update<B: Backend>(
        &mut self,
        model: &PneumoniaClassifier<B>,
        config: &ClassifierConfig,
        record: &CheckpointRecord,
    ) -> Result<bool> {
        let improved = record.val_loss < self.best;
        if !improved {
            debug!(
                "Checkpoint kept: val_loss {:.5} is not below {:.5}",
                record.val_loss, self.best
            );
            return Ok(false);
        }

        save_artifact(model, config, &self.stem)?;
        record.save(&CheckpointRecord::path_for(&self.stem))?;

        self.best = record.val_loss;
        self.saves += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::classifier::{BackboneConfig, HeadConfig, HiddenLayerConfig};
    use crate::model::densenet::DenseNetConfig;
    use burn::backend::NdArray;

    fn validation(loss: f64) -> BinaryMetrics {
        BinaryMetrics {
            loss,
            accuracy: 0.5,
            auc: 0.5,
        }
    }

    #[test]
    fn test_early_stopping_patience() {
        let mut stopper = EarlyStopping::new(&EarlyStoppingConfig::new(3));

        assert_eq!(stopper.update(0, 0.70), EarlyStoppingDecision::Improved);
        assert_eq!(stopper.update(1, 0.60), EarlyStoppingDecision::Improved);
        assert_eq!(
            stopper.update(2, 0.60),
            EarlyStoppingDecision::Waiting { wait: 1 }
        );
        assert_eq!(
            stopper.update(3, 0.65),
            EarlyStoppingDecision::Waiting { wait: 2 }
        );
        assert_eq!(stopper.update(4, 0.61), EarlyStoppingDecision::Stop);

        assert_eq!(stopper.best_epoch(), Some(1));
        assert_eq!(stopper.best(), 0.60);
    }

    #[test]
    fn test_early_stopping_improvement_resets_wait() {
        let mut stopper = EarlyStopping::new(&EarlyStoppingConfig::new(2));

        stopper.update(0, 1.0);
        assert_eq!(
            stopper.update(1, 1.1),
            EarlyStoppingDecision::Waiting { wait: 1 }
        );
        assert_eq!(stopper.update(2, 0.9), EarlyStoppingDecision::Improved);
        assert_eq!(
            stopper.update(3, 0.95),
            EarlyStoppingDecision::Waiting { wait: 1 }
        );
        assert_eq!(stopper.update(4, 0.95), EarlyStoppingDecision::Stop);
    }

    #[test]
    fn test_early_stopping_min_delta() {
        let mut config = EarlyStoppingConfig::new(1);
        config.min_delta = 0.05;
        let mut stopper = EarlyStopping::new(&config);

        stopper.update(0, 1.0);
        assert_eq!(stopper.update(1, 0.97), EarlyStoppingDecision::Stop);
    }

    #[test]
    fn test_record_path() {
        assert_eq!(
            CheckpointRecord::path_for(Path::new("output/best_model")),
            PathBuf::from("output/best_model.checkpoint.json")
        );
    }

    #[test]
    fn test_checkpoint_saves_only_on_improvement() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("best_model");
        let device = Default::default();

        let config = ClassifierConfig::new(
            BackboneConfig::new().with_densenet(DenseNetConfig::tiny()),
            HeadConfig::new(0.0, vec![HiddenLayerConfig::new(4, 0.0)]),
        );
        let model = config.init::<NdArray>(&device);
        let mut checkpoint = BestCheckpoint::new(&stem);

        let mut saved_losses = Vec::new();
        for (epoch, loss) in [0.7, 0.6, 0.65, 0.6, 0.5].into_iter().enumerate() {
            let record = CheckpointRecord::new(epoch + 1, validation(loss), 1e-5);
            if checkpoint.update(&model, &config, &record).unwrap() {
                let written = CheckpointRecord::load(&CheckpointRecord::path_for(&stem)).unwrap();
                saved_losses.push(written.val_loss);
            }
        }

        assert_eq!(saved_losses, vec![0.7, 0.6, 0.5]);
        assert_eq!(checkpoint.saves(), 3);
        assert!(saved_losses.windows(2).all(|w| w[1] <= w[0]));
        assert!(crate::model::artifact::artifact_exists(&stem));
    }
}
