//! Error Handling Module
//!
//! Defines the error type shared by the data pipeline, the model code,
//! training and inference. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the pneumonia classifier
#[derive(Error, Debug)]
pub enum PneumoniaError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction or weight import
    #[error("Model error: {0}")]
    Model(String),

    /// Error during training
    #[error("Training error: {0}")]
    Training(String),

    /// Error during inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Burn recorder failure while saving or loading weights
    #[error("Recorder error: {0}")]
    Recorder(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Loss became NaN or infinite
    #[error("Numerical divergence: non-finite loss at epoch {epoch}, batch {batch}")]
    NumericalDivergence { epoch: usize, batch: usize },
}

/// Convenience Result type
pub type Result<T> = std::result::Result<T, PneumoniaError>;

impl From<burn::record::RecorderError> for PneumoniaError {
    fn from(err: burn::record::RecorderError) -> Self {
        PneumoniaError::Recorder(format!("{:?}", err))
    }
}
