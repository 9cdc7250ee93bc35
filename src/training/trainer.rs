//! Training Loop for the Pneumonia Classifier
//!
//! A custom Burn training loop:
//! - Binary cross-entropy on logits, Adam optimizer
//! - Shuffled, augmented training batches (trailing partial batch dropped)
//! - Validation with the inference-mode model after every epoch
//! - Epoch-end monitors in order: early stopping, best checkpoint, plateau LR reduction
//!
//! A non-finite training loss aborts the run.

use std::path::PathBuf;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    module::{AutodiffModule, Module},
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{activation::sigmoid, backend::AutodiffBackend, ElementConversion},
};
use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::callbacks::{BestCheckpoint, CheckpointRecord, EarlyStopping, EarlyStoppingDecision};
use super::history::TrainingHistory;
use super::scheduler::ReduceOnPlateauState;
use crate::config::ExperimentConfig;
use crate::dataset::burn_dataset::{AugmentingBatcher, XrayBatch, XrayDataset};
use crate::dataset::loader::XrayDirectory;
use crate::evaluation::evaluate_split;
use crate::model::artifact::save_artifact;
use crate::model::classifier::PneumoniaClassifier;
use crate::utils::error::{PneumoniaError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{BinaryMetrics, BinaryTracker};

/// Why the training loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All configured epochs ran
    MaxEpochs,
    /// Validation loss stopped improving
    EarlyStopping,
}

/// Result of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_run: usize,
    /// 1-based epoch with the lowest validation loss
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub stop_reason: StopReason,
    pub checkpoint: PathBuf,
    pub final_model: PathBuf,
    pub history_file: PathBuf,
}

impl TrainingSummary {
    pub fn print(&self) {
        println!();
        println!("{}", "Training Summary:".green().bold());
        println!("  Epochs run:      {}", self.epochs_run);
        println!(
            "  Best epoch:      {} (val_loss {:.4})",
            self.best_epoch, self.best_val_loss
        );
        let reason = match self.stop_reason {
            StopReason::MaxEpochs => "max epochs reached",
            StopReason::EarlyStopping => "early stopping",
        };
        println!("  Stopped by:      {}", reason);
        println!("  Best checkpoint: {}", self.checkpoint.display());
        println!("  Final model:     {}", self.final_model.display());
        println!("  History:         {}", self.history_file.display());
    }
}

/// Trained model together with its history
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub model: PneumoniaClassifier<B>,
    pub history: TrainingHistory,
    pub summary: TrainingSummary,
}

/// Load the data described by `config`, build the model and train it
///
/// The effective configuration is written to `<output>/config.json` first.
pub fn run_training<B: AutodiffBackend>(
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<TrainingOutcome<B>> {
    config.validate()?;

    println!("{}", "Initializing Training...".green().bold());
    info!("Profile: {}", config.profile);

    std::fs::create_dir_all(&config.output.dir)?;
    config.save(&config.output.config_path())?;

    println!("{}", "Loading Dataset...".cyan());
    let directory = XrayDirectory::load(&config.data)?;
    for stats in directory.stats() {
        stats.print();
    }
    println!();

    println!("{}", "Pre-loading Training Data...".cyan().bold());
    let train = XrayDataset::from_split(&directory.train)?;
    println!("{}", "Pre-loading Validation Data...".cyan().bold());
    let validation = XrayDataset::from_split(&directory.validation)?;

    println!("{}", "Creating Model...".cyan());
    let model = config.model.build::<B>(device)?;

    fit(model, &train, &validation, config, device)
}

/// Train `model` on in-memory splits
///
/// Writes the best checkpoint during training, then the final model and the
/// history once the loop ends.
pub fn fit<B: AutodiffBackend>(
    mut model: PneumoniaClassifier<B>,
    train: &XrayDataset,
    validation: &XrayDataset,
    config: &ExperimentConfig,
    device: &B::Device,
) -> Result<TrainingOutcome<B>> {
    let training = &config.training;
    let batch_size = training.batch_size;

    if train.len() < batch_size {
        return Err(PneumoniaError::Config(format!(
            "training split has {} images, fewer than batch size {}",
            train.len(),
            batch_size
        )));
    }
    if validation.len() == 0 {
        return Err(PneumoniaError::Dataset(
            "validation split has no images".to_string(),
        ));
    }

    let steps_per_epoch = train.len() / batch_size;

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Training samples:   {}", train.len());
    println!("  Validation samples: {}", validation.len());
    println!("  Epochs:             {}", training.epochs);
    println!("  Batch size:         {}", batch_size);
    println!("  Steps per epoch:    {}", steps_per_epoch);
    println!("  Learning rate:      {}", training.learning_rate);
    println!(
        "  Trainable backbone: layers {}+ of {}",
        config.model.backbone.trainable_from,
        model.backbone.num_param_layers()
    );
    println!();

    let mut optimizer = AdamConfig::new()
        .with_epsilon(training.adam_epsilon as f32)
        .init();

    let batcher = AugmentingBatcher::new(config.data.augmentation.clone(), training.seed);
    let mut shuffle_rng = ChaCha8Rng::seed_from_u64(training.seed);

    let mut logger = TrainingLogger::new(training.epochs);
    let mut history = TrainingHistory::new();
    let mut early_stopping = EarlyStopping::new(&training.early_stopping);
    let mut checkpoint = BestCheckpoint::new(config.output.checkpoint_stem());
    let mut plateau = training
        .lr_plateau
        .as_ref()
        .map(|p| ReduceOnPlateauState::from_config(training.learning_rate, p));

    let mut learning_rate = training.learning_rate;
    // Record copy: module clones share batch norm running state
    let mut best_weights = None;
    let mut stop_reason = StopReason::MaxEpochs;

    println!("{}", "Starting Training...".green().bold());

    for epoch in 0..training.epochs {
        logger.start_epoch(epoch, learning_rate);

        let mut indices: Vec<usize> = (0..train.len()).collect();
        indices.shuffle(&mut shuffle_rng);

        let mut tracker = BinaryTracker::new();
        for (step, chunk) in indices.chunks_exact(batch_size).enumerate() {
            let items: Vec<_> = chunk.iter().filter_map(|&i| train.get(i)).collect();
            let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
            let batch: XrayBatch<B> = batcher.batch(items, device);

            let logits = model.forward(batch.images);
            let targets = batch.targets.reshape([labels.len(), 1]);
            let loss = BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(device)
                .forward(logits.clone(), targets);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(PneumoniaError::NumericalDivergence {
                    epoch: epoch + 1,
                    batch: step + 1,
                });
            }

            let probabilities = sigmoid(logits.detach())
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| PneumoniaError::Training(format!("{:?}", e)))?;
            tracker.add_batch(&probabilities, &labels, loss_value);

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(learning_rate, model, grads);

            if (step + 1) % 10 == 0 || step + 1 == steps_per_epoch {
                debug!(
                    "  Batch {:>4}/{}: loss = {:.4}, acc = {:.4}",
                    step + 1,
                    steps_per_epoch,
                    loss_value,
                    tracker.accuracy()
                );
            }
        }
        let train_metrics = tracker.metrics();

        let val_metrics = evaluate_split(&model.valid(), validation, batch_size, device)?.metrics();

        logger.end_epoch(as_tuple(&train_metrics), as_tuple(&val_metrics));
        history.record(epoch + 1, train_metrics, val_metrics, learning_rate);

        let decision = early_stopping.update(epoch, val_metrics.loss);
        if decision == EarlyStoppingDecision::Improved && early_stopping.restore_best_weights() {
            best_weights = Some(model.clone().into_record());
        }

        let previous_best = checkpoint.best();
        let record = CheckpointRecord::new(epoch + 1, val_metrics, learning_rate);
        if checkpoint.update(&model, &config.model, &record)? {
            logger.log_checkpoint(previous_best, val_metrics.loss, checkpoint.stem());
        } else {
            logger.log_no_improvement(previous_best);
        }

        if decision == EarlyStoppingDecision::Stop {
            stop_reason = StopReason::EarlyStopping;
            logger.log_early_stop(
                early_stopping.patience(),
                early_stopping.best_epoch().unwrap_or(epoch),
            );
            if let Some(record) = best_weights.take() {
                model = model.load_record(record);
            }
            break;
        }

        if let Some(scheduler) = plateau.as_mut() {
            learning_rate = scheduler.step(val_metrics.loss);
            if scheduler.lr_was_reduced() {
                logger.log_lr_reduced(learning_rate);
            }
        }
    }

    let output = &config.output;
    let final_model = output.final_model_stem();
    save_artifact(&model, &config.model, &final_model)?;
    let history_file = output.history_path();
    history.save(&history_file)?;

    let (best_epoch, best_val_loss) = history
        .best_validation()
        .map(|m| (m.epoch, m.loss))
        .unwrap_or((0, f64::INFINITY));
    logger.log_complete(history.len(), best_val_loss);

    let summary = TrainingSummary {
        epochs_run: history.len(),
        best_epoch,
        best_val_loss,
        stop_reason,
        checkpoint: checkpoint.stem().to_path_buf(),
        final_model,
        history_file,
    };

    Ok(TrainingOutcome {
        model,
        history,
        summary,
    })
}

fn as_tuple(metrics: &BinaryMetrics) -> (f64, f64, f64) {
    (metrics.loss, metrics.accuracy, metrics.auc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingProfile;
    use crate::dataset::loader::tests::write_split;
    use crate::evaluation::predict_probabilities;
    use crate::model::artifact::{artifact_exists, load_artifact};
    use crate::model::classifier::HiddenLayerConfig;
    use crate::model::densenet::DenseNetConfig;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    fn tiny_experiment(root: &std::path::Path, output: &std::path::Path) -> ExperimentConfig {
        let mut config = ExperimentConfig::for_profile(TrainingProfile::FineTune);
        config.data = crate::config::DataConfig::new(root);
        config.model.backbone.densenet = DenseNetConfig::tiny();
        config.model.backbone.trainable_from = 20;
        config.model.head.hidden = vec![HiddenLayerConfig::new(8, 0.5)];
        config.training.epochs = 1;
        config.training.batch_size = 2;
        config.training.learning_rate = 1e-3;
        config.output.dir = output.to_path_buf();
        config
    }

    fn write_dataset(root: &std::path::Path, train_per_class: usize, val_per_class: usize) {
        write_split(&root.join("train"), train_per_class);
        write_split(&root.join("val"), val_per_class);
        write_split(&root.join("test"), 1);
    }

    #[test]
    fn test_one_epoch_end_to_end() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path(), 10, 10);

        let config = tiny_experiment(data.path(), output.path());
        let device = Default::default();
        let outcome = run_training::<TestBackend>(&config, &device).unwrap();

        assert_eq!(outcome.history.train.len(), 1);
        assert_eq!(outcome.history.validation.len(), 1);
        assert_eq!(outcome.history.learning_rate.len(), 1);
        assert_eq!(outcome.summary.epochs_run, 1);
        assert_eq!(outcome.summary.best_epoch, 1);
        assert_eq!(outcome.summary.stop_reason, StopReason::MaxEpochs);

        let val = outcome.history.validation[0];
        assert!(val.loss.is_finite());
        assert!((0.0..=1.0).contains(&val.accuracy));

        assert!(artifact_exists(&config.output.checkpoint_stem()));
        assert!(artifact_exists(&config.output.final_model_stem()));
        assert!(config.output.config_path().exists());

        let saved = TrainingHistory::load(&config.output.history_path()).unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn test_early_stopping_bound_and_checkpoint() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path(), 3, 2);

        let mut config = tiny_experiment(data.path(), output.path());
        config.training.epochs = 4;
        config.training.early_stopping.patience = 1;

        let device = Default::default();
        let outcome = run_training::<TestBackend>(&config, &device).unwrap();
        let summary = &outcome.summary;

        // halts no later than `patience` epochs after the last improvement
        assert!(summary.epochs_run <= summary.best_epoch + 1);
        if summary.stop_reason == StopReason::EarlyStopping {
            assert_eq!(summary.epochs_run, summary.best_epoch + 1);
        }

        // the checkpoint reflects the lowest validation loss seen
        let record = CheckpointRecord::load(&CheckpointRecord::path_for(&summary.checkpoint)).unwrap();
        assert_eq!(record.epoch, summary.best_epoch);
        assert_eq!(record.val_loss, summary.best_val_loss);
    }

    /// Frozen backbone, plain head without dropout or batch norm: two runs
    /// from the same initial model take identical steps.
    fn deterministic_experiment(
        root: &std::path::Path,
        output: &std::path::Path,
    ) -> ExperimentConfig {
        let mut config = tiny_experiment(root, output);
        config.model.backbone.trainable_from = DenseNetConfig::tiny().num_param_layers();
        config.model.head.input_dropout = 0.0;
        config.model.head.hidden = vec![HiddenLayerConfig::new(8, 0.0)];
        config.model.head.batch_norm = false;
        config.training.learning_rate = 5e-2;
        config.training.lr_plateau = None;
        config
    }

    fn validation_probabilities(
        model: &PneumoniaClassifier<TestBackend>,
        validation: &XrayDataset,
    ) -> Vec<f32> {
        predict_probabilities(&model.valid(), validation, 4, &Default::default()).unwrap()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-6, "{} vs {}", x, y);
        }
    }

    #[test]
    fn test_early_stop_restores_best_weights() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path(), 4, 3);

        let base = deterministic_experiment(data.path(), data.path());
        let directory = XrayDirectory::load(&base.data).unwrap();
        let train = XrayDataset::from_split(&directory.train).unwrap();
        let validation = XrayDataset::from_split(&directory.validation).unwrap();

        let device = Default::default();
        let initial = base.model.build::<TestBackend>(&device).unwrap();

        // reference: weights after exactly one epoch
        let one_epoch_dir = tempfile::tempdir().unwrap();
        let mut one_epoch = deterministic_experiment(data.path(), one_epoch_dir.path());
        one_epoch.training.epochs = 1;
        let reference = fit(initial.clone(), &train, &validation, &one_epoch, &device).unwrap();
        let after_first = validation_probabilities(&reference.model, &validation);

        // no later epoch can beat epoch 1 by min_delta, so training stops at epoch 2
        let stopped_dir = tempfile::tempdir().unwrap();
        let mut stopped = deterministic_experiment(data.path(), stopped_dir.path());
        stopped.training.epochs = 4;
        stopped.training.early_stopping.patience = 1;
        stopped.training.early_stopping.min_delta = 1e9;
        let outcome = fit(initial.clone(), &train, &validation, &stopped, &device).unwrap();

        assert_eq!(outcome.summary.stop_reason, StopReason::EarlyStopping);
        assert_eq!(outcome.summary.epochs_run, 2);
        assert_close(&validation_probabilities(&outcome.model, &validation), &after_first);

        // the saved final model is the restored one
        let (saved, _) = load_artifact::<NdArray>(&stopped.output.final_model_stem(), &device).unwrap();
        let saved_probs = predict_probabilities(&saved, &validation, 4, &device).unwrap();
        assert_close(&saved_probs, &after_first);
    }

    #[test]
    fn test_max_epochs_keeps_last_weights() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path(), 4, 3);

        let base = deterministic_experiment(data.path(), data.path());
        let directory = XrayDirectory::load(&base.data).unwrap();
        let train = XrayDataset::from_split(&directory.train).unwrap();
        let validation = XrayDataset::from_split(&directory.validation).unwrap();

        let device = Default::default();
        let initial = base.model.build::<TestBackend>(&device).unwrap();

        let one_epoch_dir = tempfile::tempdir().unwrap();
        let mut one_epoch = deterministic_experiment(data.path(), one_epoch_dir.path());
        one_epoch.training.epochs = 1;
        let reference = fit(initial.clone(), &train, &validation, &one_epoch, &device).unwrap();
        let after_first = validation_probabilities(&reference.model, &validation);

        let full_dir = tempfile::tempdir().unwrap();
        let mut full = deterministic_experiment(data.path(), full_dir.path());
        full.training.epochs = 3;
        full.training.early_stopping.patience = 10;
        let outcome = fit(initial.clone(), &train, &validation, &full, &device).unwrap();

        assert_eq!(outcome.summary.stop_reason, StopReason::MaxEpochs);
        assert_eq!(outcome.summary.epochs_run, 3);
        let last = validation_probabilities(&outcome.model, &validation);
        assert!(last.iter().zip(&after_first).any(|(a, b)| (a - b).abs() > 1e-6));

        let (saved, _) = load_artifact::<NdArray>(&full.output.final_model_stem(), &device).unwrap();
        assert_close(&predict_probabilities(&saved, &validation, 4, &device).unwrap(), &last);
    }

    #[test]
    fn test_too_few_training_images() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path(), 1, 1);

        let mut config = tiny_experiment(data.path(), output.path());
        config.training.batch_size = 4;

        let device = Default::default();
        let result = run_training::<TestBackend>(&config, &device);
        assert!(matches!(result, Err(PneumoniaError::Config(_))));
    }
}
