//! # Pneumonia DenseNet
//!
//! Chest X-ray pneumonia classification with a DenseNet121 transfer-learning
//! backbone, built on the Burn framework.
//!
//! ## Modules
//!
//! - `dataset`: Split directory loading, augmentation and batching
//! - `model`: DenseNet121 backbone, classification head and model artifacts
//! - `training`: Training loop with early stopping, checkpointing and plateau LR reduction
//! - `evaluation`: Test-split metrics, classification report and training curves
//! - `inference`: Single-image prediction and analysis history
//! - `config`: Experiment configuration and training profiles
//! - `utils`: Logging, metrics, charts and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pneumonia_densenet::inference::Predictor;
//! use pneumonia_densenet::backend::{default_device, DefaultBackend};
//!
//! let predictor = Predictor::<DefaultBackend>::load("output/best_model", &default_device())?;
//! let diagnosis = predictor.predict_path("chest.jpeg")?;
//! println!("{}", diagnosis.display());
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

pub use config::{ExperimentConfig, TrainingProfile};
pub use dataset::{XrayBatch, XrayBatcher, XrayDataset, XrayItem};
pub use inference::{Diagnosis, Label, Predictor};
pub use model::{ClassifierConfig, DenseNet, DenseNetConfig, PneumoniaClassifier};
pub use training::{TrainingHistory, TrainingSummary};
pub use utils::error::{PneumoniaError, Result};

/// Input resolution (height and width) expected by the model
pub const IMAGE_SIZE: usize = 224;

/// Number of colour channels fed to the backbone
pub const NUM_CHANNELS: usize = 3;

/// Class names in label order
pub const CLASS_NAMES: [&str; 2] = ["NORMAL", "PNEUMONIA"];

/// Probabilities strictly above this are classified as pneumonia
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
