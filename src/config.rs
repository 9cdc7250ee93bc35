//! Experiment Configuration Module
//!
//! One serde-serialisable [`ExperimentConfig`] describes a full run: where the
//! data lives, the model architecture, the optimisation hyperparameters with
//! their monitors, and where artifacts are written. The two training
//! variants are presets of the same pipeline ([`TrainingProfile`]).

use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::loader::Split;
use crate::model::classifier::{BackboneConfig, ClassifierConfig, HeadConfig, HiddenLayerConfig};
use crate::model::densenet::DenseNetConfig;
use crate::utils::error::{PneumoniaError, Result};

/// Backbone cutoff of the fine-tune profile: trainable from the second batch
/// norm of dense layer index 12 (the 13th) in the last dense block onwards.
pub const FINE_TUNE_TRAINABLE_FROM: usize = 226;

/// Training presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TrainingProfile {
    /// Partially unfrozen backbone, two hidden layers, plateau LR reduction
    FineTune,
    /// Fully frozen backbone, one hidden layer
    FrozenBackbone,
}

impl fmt::Display for TrainingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingProfile::FineTune => write!(f, "fine-tune"),
            TrainingProfile::FrozenBackbone => write!(f, "frozen-backbone"),
        }
    }
}

/// Dataset location and training-split augmentation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the split directories
    pub root: PathBuf,
    pub train_dir: String,
    pub val_dir: String,
    pub test_dir: String,
    /// Augmentation for the training split
    pub augmentation: AugmentationConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self::new("data/chest_xray")
    }
}

impl DataConfig {
    /// Standard `train`/`val`/`test` layout under `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            train_dir: "train".to_string(),
            val_dir: "val".to_string(),
            test_dir: "test".to_string(),
            augmentation: AugmentationConfig::xray(),
        }
    }

    /// Directory of one split
    pub fn split_dir(&self, split: Split) -> PathBuf {
        let name = match split {
            Split::Train => &self.train_dir,
            Split::Validation => &self.val_dir,
            Split::Test => &self.test_dir,
        };
        self.root.join(name)
    }
}

/// Early stopping on validation loss
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    /// Non-improving epochs tolerated before stopping
    pub patience: usize,
    /// Minimum decrease that counts as an improvement
    pub min_delta: f64,
    /// Restore the best epoch's weights when stopping early
    pub restore_best_weights: bool,
}

impl EarlyStoppingConfig {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            min_delta: 0.0,
            restore_best_weights: true,
        }
    }
}

/// Learning rate reduction when validation loss plateaus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            factor: 0.2,
            patience: 4,
            min_lr: 1e-7,
            min_delta: 1e-4,
        }
    }
}

/// Optimisation hyperparameters and monitors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of epochs
    pub epochs: usize,
    pub batch_size: usize,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    pub adam_epsilon: f64,
    /// Seeds shuffling and augmentation
    pub seed: u64,
    pub early_stopping: EarlyStoppingConfig,
    /// `None` keeps the learning rate constant
    pub lr_plateau: Option<PlateauConfig>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-5,
            adam_epsilon: 1e-7,
            seed: 42,
            early_stopping: EarlyStoppingConfig::new(6),
            lr_plateau: Some(PlateauConfig::default()),
        }
    }
}

/// Artifact locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// Stem of the best-validation-loss checkpoint
    pub checkpoint_name: String,
    /// Stem of the model saved after the last epoch
    pub final_model_name: String,
    pub history_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            checkpoint_name: "best_model".to_string(),
            final_model_name: "final_model".to_string(),
            history_file: "training_history.json".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn checkpoint_stem(&self) -> PathBuf {
        self.dir.join(&self.checkpoint_name)
    }

    pub fn final_model_stem(&self) -> PathBuf {
        self.dir.join(&self.final_model_name)
    }

    pub fn history_path(&self) -> PathBuf {
        self.dir.join(&self.history_file)
    }

    /// Effective experiment configuration written before training
    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }
}

/// Complete description of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub profile: TrainingProfile,
    pub data: DataConfig,
    pub model: ClassifierConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::for_profile(TrainingProfile::FineTune)
    }
}

impl ExperimentConfig {
    /// Build the preset for a profile
    pub fn for_profile(profile: TrainingProfile) -> Self {
        let densenet = DenseNetConfig::densenet121();

        match profile {
            TrainingProfile::FineTune => Self {
                profile,
                data: DataConfig::default(),
                model: ClassifierConfig::new(
                    BackboneConfig::new().with_trainable_from(FINE_TUNE_TRAINABLE_FROM),
                    HeadConfig::new(
                        0.5,
                        vec![
                            HiddenLayerConfig::new(256, 0.5),
                            HiddenLayerConfig::new(128, 0.3),
                        ],
                    ),
                ),
                training: TrainingConfig::default(),
                output: OutputConfig::default(),
            },
            TrainingProfile::FrozenBackbone => Self {
                profile,
                data: DataConfig::default(),
                model: ClassifierConfig::new(
                    BackboneConfig::new().with_trainable_from(densenet.num_param_layers()),
                    HeadConfig::new(0.3, vec![HiddenLayerConfig::new(128, 0.3)])
                        .with_batch_norm(false),
                ),
                training: TrainingConfig {
                    learning_rate: 1e-4,
                    early_stopping: EarlyStoppingConfig::new(3),
                    lr_plateau: None,
                    ..TrainingConfig::default()
                },
                output: OutputConfig {
                    checkpoint_name: "best_model_frozen".to_string(),
                    ..OutputConfig::default()
                },
            },
        }
    }

    /// Validate the configuration, reporting the first invalid field
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(PneumoniaError::Config(msg));

        let training = &self.training;
        if training.epochs == 0 {
            return invalid("training.epochs must be greater than 0".to_string());
        }
        if training.batch_size == 0 {
            return invalid("training.batch_size must be greater than 0".to_string());
        }
        if !(training.learning_rate.is_finite() && training.learning_rate > 0.0) {
            return invalid(format!(
                "training.learning_rate must be positive, got {}",
                training.learning_rate
            ));
        }
        if !(training.adam_epsilon.is_finite() && training.adam_epsilon > 0.0) {
            return invalid(format!(
                "training.adam_epsilon must be positive, got {}",
                training.adam_epsilon
            ));
        }
        if training.early_stopping.min_delta.is_nan() || training.early_stopping.min_delta < 0.0 {
            return invalid("training.early_stopping.min_delta must be >= 0".to_string());
        }

        if let Some(plateau) = &training.lr_plateau {
            if !(plateau.factor > 0.0 && plateau.factor < 1.0) {
                return invalid(format!(
                    "training.lr_plateau.factor must be in range (0.0, 1.0), got {}",
                    plateau.factor
                ));
            }
            if plateau.min_lr.is_nan() || plateau.min_lr < 0.0 {
                return invalid("training.lr_plateau.min_lr must be >= 0".to_string());
            }
            if plateau.min_delta.is_nan() || plateau.min_delta < 0.0 {
                return invalid("training.lr_plateau.min_delta must be >= 0".to_string());
            }
        }

        self.data
            .augmentation
            .validate()
            .map_err(|e| PneumoniaError::Config(format!("data.augmentation: {}", e)))?;

        self.model.validate()?;

        let output = &self.output;
        for (name, value) in [
            ("output.checkpoint_name", &output.checkpoint_name),
            ("output.final_model_name", &output.final_model_name),
            ("output.history_file", &output.history_file),
        ] {
            if value.trim().is_empty() {
                return invalid(format!("{} must not be empty", name));
            }
        }
        if output.checkpoint_name == output.final_model_name {
            return invalid(
                "output.checkpoint_name and output.final_model_name must differ".to_string(),
            );
        }

        Ok(())
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PneumoniaError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
