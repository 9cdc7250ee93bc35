//! Evaluation & Reporting
//!
//! Runs a model over a split in dataset order, derives the scalar summary
//! (loss, accuracy, ROC AUC) and the per-class report, and renders the
//! training curves of a run.

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use chrono::Utc;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DataConfig;
use crate::dataset::burn_dataset::{XrayBatch, XrayBatcher, XrayDataset};
use crate::dataset::loader::{ensure_same_classes, Split, SplitDirectory};
use crate::model::artifact::load_artifact;
use crate::model::classifier::PneumoniaClassifier;
use crate::training::history::TrainingHistory;
use crate::utils::charts::{generate_line_chart, DataSeries, COLOR_PRIMARY, COLOR_SECONDARY};
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::metrics::{BinaryMetrics, BinaryTracker, ClassificationReport};

pub const EVALUATION_FILE: &str = "evaluation.json";
pub const CONFUSION_MATRIX_FILE: &str = "confusion_matrix.csv";
pub const ACCURACY_PLOT_FILE: &str = "accuracy.svg";
pub const LOSS_PLOT_FILE: &str = "loss.svg";

/// Probabilities for every sample of `dataset`, in dataset order
///
/// The last batch may be partial. Pass an inference-mode model (`valid()`).
pub fn predict_probabilities<B: Backend>(
    model: &PneumoniaClassifier<B>,
    dataset: &XrayDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<Vec<f32>> {
    if batch_size == 0 {
        return Err(PneumoniaError::Config(
            "batch_size must be greater than 0".to_string(),
        ));
    }

    let batcher = XrayBatcher::new();
    let mut probabilities = Vec::with_capacity(dataset.len());

    for start in (0..dataset.len()).step_by(batch_size) {
        let items = dataset.slice(start, start + batch_size);
        let batch: XrayBatch<B> = batcher.batch(items, device);

        let output = model.forward_probability(batch.images);
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PneumoniaError::Inference(format!("{:?}", e)))?;
        probabilities.extend(values);
    }

    Ok(probabilities)
}

/// Per-sample metrics of a model on one split
pub fn evaluate_split<B: Backend>(
    model: &PneumoniaClassifier<B>,
    dataset: &XrayDataset,
    batch_size: usize,
    device: &B::Device,
) -> Result<BinaryTracker> {
    let probabilities = predict_probabilities(model, dataset, batch_size, device)?;
    let mut tracker = BinaryTracker::new();
    tracker.add_samples(&probabilities, &dataset.labels());
    Ok(tracker)
}

/// Test-split evaluation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub model: String,
    pub num_samples: usize,
    pub metrics: BinaryMetrics,
    pub report: ClassificationReport,
    pub evaluated_at: String,
}

impl EvaluationReport {
    /// Build the report from accumulated predictions
    pub fn from_tracker(model: &str, tracker: &BinaryTracker, class_names: &[String]) -> Self {
        let report =
            ClassificationReport::from_predictions(&tracker.predictions(), tracker.labels(), class_names);

        Self {
            model: model.to_string(),
            num_samples: tracker.len(),
            metrics: tracker.metrics(),
            report,
            evaluated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Print the summary and the classification report
    pub fn print(&self) {
        println!();
        println!("{}", "Test Metrics:".cyan().bold());
        print!("{}", self.metrics.display());
        println!();
        println!("{}", "Classification Report:".cyan().bold());
        println!("{}", self.report.display());
        println!("{}", "Confusion Matrix:".cyan().bold());
        let names: Vec<String> = self
            .report
            .per_class
            .iter()
            .map(|c| c.class_name.clone().unwrap_or_else(|| c.class_idx.to_string()))
            .collect();
        println!("{}", self.report.confusion_matrix.display(Some(names.as_slice())));
    }

    /// Write `evaluation.json` and `confusion_matrix.csv` into `dir`
    pub fn save(&self, dir: &Path, class_names: &[String]) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(EVALUATION_FILE), serde_json::to_string_pretty(self)?)?;
        self.report
            .confusion_matrix
            .save_csv(&dir.join(CONFUSION_MATRIX_FILE), class_names)?;
        info!("Evaluation written to {}", dir.display());
        Ok(())
    }
}

/// Evaluate a model on an already loaded split
pub fn evaluate_model<B: Backend>(
    model: &PneumoniaClassifier<B>,
    model_name: &str,
    dataset: &XrayDataset,
    class_names: &[String],
    batch_size: usize,
    device: &B::Device,
) -> Result<EvaluationReport> {
    info!("Evaluating {} on {} samples", model_name, dataset.len());
    let tracker = evaluate_split(model, dataset, batch_size, device)?;
    Ok(EvaluationReport::from_tracker(model_name, &tracker, class_names))
}

/// Load a saved artifact and evaluate it on the test split
pub fn evaluate_artifact<B: Backend>(
    stem: &Path,
    data: &DataConfig,
    batch_size: usize,
    output_dir: &Path,
    device: &B::Device,
) -> Result<EvaluationReport> {
    let (model, _config) = load_artifact::<B>(stem, device)?;

    let train = SplitDirectory::load(&data.split_dir(Split::Train), Split::Train)?;
    let test = SplitDirectory::load(&data.split_dir(Split::Test), Split::Test)?;
    ensure_same_classes(&train, &test)?;

    let dataset = XrayDataset::from_split(&test)?;
    let report = evaluate_model(
        &model,
        &stem.display().to_string(),
        &dataset,
        &test.class_names,
        batch_size,
        device,
    )?;
    report.save(output_dir, &test.class_names)?;

    Ok(report)
}

/// Render the accuracy and loss curves of a run into `output_dir`
///
/// Returns the paths of the accuracy and loss charts.
pub fn plot_history(history: &TrainingHistory, output_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    if history.is_empty() {
        return Err(PneumoniaError::InvalidInput(
            "training history has no epochs to plot".to_string(),
        ));
    }
    std::fs::create_dir_all(output_dir)?;

    let accuracy_path = output_dir.join(ACCURACY_PLOT_FILE);
    generate_line_chart(
        "Training vs Validation Accuracy",
        "Epoch",
        "Accuracy",
        &[
            DataSeries::from_epochs("Train", &history.train_accuracies(), COLOR_PRIMARY),
            DataSeries::from_epochs("Val", &history.val_accuracies(), COLOR_SECONDARY),
        ],
        None,
        &accuracy_path,
    )?;

    let loss_path = output_dir.join(LOSS_PLOT_FILE);
    generate_line_chart(
        "Training vs Validation Loss",
        "Epoch",
        "Loss",
        &[
            DataSeries::from_epochs("Train", &history.train_losses(), COLOR_PRIMARY),
            DataSeries::from_epochs("Val", &history.val_losses(), COLOR_SECONDARY),
        ],
        None,
        &loss_path,
    )?;

    info!(
        "Training curves written to {} and {}",
        accuracy_path.display(),
        loss_path.display()
    );
    Ok((accuracy_path, loss_path))
}
