//! Pneumonia DenseNet CLI
//!
//! Trains, evaluates and inspects the DenseNet121 chest X-ray pneumonia
//! classifier.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use burn::module::AutodiffModule;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use pneumonia_densenet::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use pneumonia_densenet::config::{DataConfig, ExperimentConfig, TrainingProfile};
use pneumonia_densenet::dataset::{XrayDataset, XrayDirectory};
use pneumonia_densenet::evaluation::{evaluate_artifact, evaluate_model, plot_history};
use pneumonia_densenet::training::{run_training, TrainingHistory};
use pneumonia_densenet::utils::logging::{init_logging, LogConfig};

/// DenseNet121 Chest X-ray Pneumonia Classification
///
/// Transfer-learning pipeline for the NORMAL/PNEUMONIA chest X-ray dataset
/// built on the Burn framework.
#[derive(Parser, Debug)]
#[command(name = "pneumonia_densenet")]
#[command(version)]
#[command(about = "Chest X-ray pneumonia classification with DenseNet121 and Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the classifier on the train/val splits
    Train {
        /// Training preset
        #[arg(long, value_enum, default_value_t = TrainingProfile::FineTune)]
        profile: TrainingProfile,

        /// Experiment configuration JSON (overrides the profile preset)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Dataset root holding train/, val/ and test/
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Maximum number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Initial learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Random seed for shuffling and augmentation
        #[arg(long)]
        seed: Option<u64>,

        /// Output directory for models, history and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// torchvision densenet121 state dict (.pth)
        #[arg(long)]
        pretrained: Option<PathBuf>,
    },

    /// Evaluate a saved model on the test split
    Evaluate {
        /// Model stem (`<stem>.mpk` + `<stem>.json`)
        #[arg(short, long, default_value = "output/best_model")]
        model: PathBuf,

        /// Dataset root holding train/, val/ and test/
        #[arg(short, long, default_value = "data/chest_xray")]
        data_dir: PathBuf,

        /// Batch size for inference
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Where evaluation.json and confusion_matrix.csv are written
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Show dataset statistics
    Stats {
        /// Dataset root holding train/, val/ and test/
        #[arg(short, long, default_value = "data/chest_xray")]
        data_dir: PathBuf,
    },

    /// Render accuracy and loss curves from a saved history
    Plot {
        /// Training history JSON
        #[arg(long, default_value = "output/training_history.json")]
        history: PathBuf,

        /// Output directory for the charts
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,
    },
}

/// Command-line overrides applied on top of a configuration
struct TrainOverrides {
    data_dir: Option<PathBuf>,
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    seed: Option<u64>,
    output_dir: Option<PathBuf>,
    pretrained: Option<PathBuf>,
}

impl TrainOverrides {
    fn apply(self, config: &mut ExperimentConfig) {
        if let Some(dir) = self.data_dir {
            config.data.root = dir;
        }
        if let Some(epochs) = self.epochs {
            config.training.epochs = epochs;
        }
        if let Some(batch_size) = self.batch_size {
            config.training.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            config.training.learning_rate = lr;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        if let Some(dir) = self.output_dir {
            config.output.dir = dir;
        }
        if let Some(weights) = self.pretrained {
            config.model.backbone.pretrained_weights = Some(weights);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            profile,
            config,
            data_dir,
            epochs,
            batch_size,
            learning_rate,
            seed,
            output_dir,
            pretrained,
        } => {
            let overrides = TrainOverrides {
                data_dir,
                epochs,
                batch_size,
                learning_rate,
                seed,
                output_dir,
                pretrained,
            };
            cmd_train(profile, config.as_deref(), overrides)?;
        }

        Commands::Evaluate {
            model,
            data_dir,
            batch_size,
            output_dir,
        } => {
            cmd_evaluate(&model, &data_dir, batch_size, &output_dir)?;
        }

        Commands::Stats { data_dir } => {
            cmd_stats(&data_dir)?;
        }

        Commands::Plot {
            history,
            output_dir,
        } => {
            cmd_plot(&history, &output_dir)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔═══════════════════════════════════════════════════════════╗
 ║   Pneumonia DenseNet                                      ║
 ║   Chest X-ray Classification with Burn + Rust             ║
 ╚═══════════════════════════════════════════════════════════╝
  "#
        .green()
    );
    println!("  Backend: {}", backend_name().cyan());
    println!();
}

fn cmd_train(
    profile: TrainingProfile,
    config_file: Option<&Path>,
    overrides: TrainOverrides,
) -> Result<()> {
    let mut config = match config_file {
        Some(path) => ExperimentConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExperimentConfig::for_profile(profile),
    };
    overrides.apply(&mut config);

    info!("Training profile: {}", config.profile);
    let device = default_device();
    let outcome = run_training::<TrainingBackend>(&config, &device)?;
    outcome.summary.print();

    println!();
    println!("{}", "Evaluating on Test Split...".cyan().bold());
    let directory = XrayDirectory::load(&config.data)?;
    let test = XrayDataset::from_split(&directory.test)?;
    let model = outcome.model.valid();
    let report = evaluate_model::<DefaultBackend>(
        &model,
        &config.output.final_model_name,
        &test,
        directory.class_names(),
        config.training.batch_size,
        &device,
    )?;
    report.print();
    report.save(&config.output.dir, directory.class_names())?;

    let (accuracy_chart, loss_chart) = plot_history(&outcome.history, &config.output.dir)?;
    println!();
    println!("{}", "Charts:".cyan().bold());
    println!("  {}", accuracy_chart.display());
    println!("  {}", loss_chart.display());

    Ok(())
}

fn cmd_evaluate(model: &Path, data_dir: &Path, batch_size: usize, output_dir: &Path) -> Result<()> {
    info!("Evaluating {} on {}", model.display(), data_dir.display());

    let device = default_device();
    let data = DataConfig::new(data_dir);
    let report = evaluate_artifact::<DefaultBackend>(model, &data, batch_size, output_dir, &device)?;
    report.print();

    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {}", data_dir.display());

    if !data_dir.exists() {
        println!(
            "{} Dataset directory not found: {}",
            "Error:".red(),
            data_dir.display()
        );
        println!();
        println!("{}", "Expected structure:".yellow());
        println!("  {}/", data_dir.display());
        println!("  ├── train/{{NORMAL,PNEUMONIA}}/");
        println!("  ├── val/{{NORMAL,PNEUMONIA}}/");
        println!("  └── test/{{NORMAL,PNEUMONIA}}/");
        bail!("dataset directory not found: {}", data_dir.display());
    }

    let directory = XrayDirectory::load(&DataConfig::new(data_dir))?;
    println!("{}", "Dataset Statistics:".cyan().bold());
    for stats in directory.stats() {
        stats.print();
    }

    Ok(())
}

fn cmd_plot(history_file: &Path, output_dir: &Path) -> Result<()> {
    let history = TrainingHistory::load(history_file)
        .with_context(|| format!("Failed to load history {}", history_file.display()))?;
    let (accuracy_chart, loss_chart) = plot_history(&history, output_dir)?;

    println!("{}", "Charts:".cyan().bold());
    println!("  {}", accuracy_chart.display());
    println!("  {}", loss_chart.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("chest_xray");

        let err = cmd_stats(&missing).unwrap_err();
        assert!(err.to_string().contains("dataset directory not found"));
    }

    #[test]
    fn test_train_overrides() {
        let mut config = ExperimentConfig::for_profile(TrainingProfile::FrozenBackbone);
        TrainOverrides {
            data_dir: Some(PathBuf::from("scans")),
            epochs: Some(3),
            batch_size: None,
            learning_rate: Some(1e-4),
            seed: None,
            output_dir: None,
            pretrained: None,
        }
        .apply(&mut config);

        assert_eq!(config.data.root, PathBuf::from("scans"));
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.learning_rate, 1e-4);
    }
}
