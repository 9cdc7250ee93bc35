//! Inference Predictor Module
//!
//! Loads a saved model artifact and classifies single chest X-rays with the
//! same preprocessing as the training pipeline.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::preprocess::{preprocess_image, preprocess_path, IMAGE_LEN};
use crate::model::artifact::load_artifact;
use crate::model::classifier::{ClassifierConfig, PneumoniaClassifier};
use crate::utils::error::{PneumoniaError, Result};
use crate::{CLASS_NAMES, DECISION_THRESHOLD, IMAGE_SIZE, NUM_CHANNELS};

/// Diagnosis label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Normal,
    Pneumonia,
}

impl Label {
    /// `Pneumonia` iff the probability is strictly above 0.5
    pub fn from_probability(probability: f32) -> Self {
        if probability > DECISION_THRESHOLD {
            Label::Pneumonia
        } else {
            Label::Normal
        }
    }

    /// Class index (0 = NORMAL, 1 = PNEUMONIA)
    pub fn index(&self) -> usize {
        match self {
            Label::Normal => 0,
            Label::Pneumonia => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        CLASS_NAMES[self.index()]
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    /// Path to the input image (if applicable)
    pub image_path: Option<PathBuf>,
    pub label: Label,
    /// Model output: probability of pneumonia
    pub probability: f32,
    /// Probability of the predicted label
    pub confidence: f32,
    pub pneumonia_probability: f32,
    pub normal_probability: f32,
    /// Inference time in milliseconds
    pub inference_time_ms: f64,
}

impl Diagnosis {
    pub fn from_probability(
        probability: f32,
        image_path: Option<PathBuf>,
        inference_time: Duration,
    ) -> Self {
        let label = Label::from_probability(probability);
        let confidence = match label {
            Label::Pneumonia => probability,
            Label::Normal => 1.0 - probability,
        };

        Self {
            image_path,
            label,
            probability,
            confidence,
            pneumonia_probability: probability,
            normal_probability: 1.0 - probability,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
        }
    }

    /// Title used on annotated images, e.g. `Prediction: PNEUMONIA (97.31%)`
    pub fn title(&self) -> String {
        format!(
            "Prediction: {} ({:.2}%)",
            self.label,
            self.confidence as f64 * 100.0
        )
    }

    /// Pretty print the diagnosis
    pub fn display(&self) -> String {
        let mut output = String::new();

        if let Some(path) = &self.image_path {
            output.push_str(&format!("Image: {}\n", path.display()));
        }
        output.push_str(&format!("{}\n", self.title()));
        output.push_str(&self.details());

        output
    }

    /// Class probabilities and timing, without the title
    pub fn details(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "  PNEUMONIA: {:.2}%\n",
            self.pneumonia_probability as f64 * 100.0
        ));
        output.push_str(&format!(
            "  NORMAL:    {:.2}%\n",
            self.normal_probability as f64 * 100.0
        ));
        output.push_str(&format!("Inference time: {:.2} ms\n", self.inference_time_ms));

        output
    }
}

/// Classifier loaded from an artifact, ready for single-image inference
///
/// Use a non-autodiff backend: dropout is then inactive and batch norm uses
/// its running statistics, so identical inputs give identical outputs.
pub struct Predictor<B: Backend> {
    model: PneumoniaClassifier<B>,
    config: ClassifierConfig,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load the artifact saved under `stem` (`<stem>.mpk` + `<stem>.json`)
    pub fn load(stem: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let stem = stem.as_ref();
        info!("Loading model from {}", stem.display());
        let (model, config) = load_artifact::<B>(stem, device)?;
        Ok(Self::from_model(model, config, device))
    }

    /// Wrap an in-memory model
    pub fn from_model(
        model: PneumoniaClassifier<B>,
        config: ClassifierConfig,
        device: &B::Device,
    ) -> Self {
        Self {
            model,
            config,
            device: device.clone(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Pneumonia probability for one preprocessed CHW image
    pub fn predict_tensor_data(&self, data: Vec<f32>) -> Result<f32> {
        if data.len() != IMAGE_LEN {
            return Err(PneumoniaError::InvalidInput(format!(
                "expected {} values, got {}",
                IMAGE_LEN,
                data.len()
            )));
        }

        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(data, [1, NUM_CHANNELS, IMAGE_SIZE, IMAGE_SIZE]),
            &self.device,
        );
        let output = self.model.forward_probability(input);
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PneumoniaError::Inference(format!("{:?}", e)))?;

        match values.first() {
            Some(&p) if p.is_finite() => Ok(p.clamp(0.0, 1.0)),
            Some(&p) => Err(PneumoniaError::Inference(format!(
                "model produced a non-finite probability: {}",
                p
            ))),
            None => Err(PneumoniaError::Inference("model produced no output".to_string())),
        }
    }

    /// Classify an in-memory image
    pub fn predict_image(&self, image: &DynamicImage) -> Result<Diagnosis> {
        let start = Instant::now();
        let probability = self.predict_tensor_data(preprocess_image(image))?;
        Ok(Diagnosis::from_probability(probability, None, start.elapsed()))
    }

    /// Classify an image file
    pub fn predict_path(&self, path: impl AsRef<Path>) -> Result<Diagnosis> {
        let path = path.as_ref();
        let start = Instant::now();
        let probability = self.predict_tensor_data(preprocess_path(path)?)?;
        let diagnosis =
            Diagnosis::from_probability(probability, Some(path.to_path_buf()), start.elapsed());

        debug!(
            "{}: p = {:.6} in {:.2} ms",
            path.display(),
            probability,
            diagnosis.inference_time_ms
        );
        Ok(diagnosis)
    }
}
