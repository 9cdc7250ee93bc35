//! Single-image chest X-ray classification
//!
//! Loads a saved model, classifies one image, writes an annotated SVG and
//! optionally appends the result to a local analysis history.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use pneumonia_densenet::backend::{default_device, DefaultBackend};
use pneumonia_densenet::inference::history::{append_record, recent_records, DEFAULT_HISTORY_FILE};
use pneumonia_densenet::inference::{default_annotation_path, save_annotation, Label, Predictor};
use pneumonia_densenet::utils::logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "classify_xray")]
#[command(version)]
#[command(about = "Classify a chest X-ray as NORMAL or PNEUMONIA", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Classify one image
    Predict {
        /// Chest X-ray image
        image: PathBuf,

        /// Model stem (`<stem>.mpk` + `<stem>.json`)
        #[arg(short, long, default_value = "output/best_model")]
        model: PathBuf,

        /// Annotated SVG path (default: `<image stem>_prediction.svg` next to the image)
        #[arg(short, long)]
        annotate: Option<PathBuf>,

        /// Append the result to this history file
        #[arg(long)]
        history_file: Option<PathBuf>,
    },

    /// List recent classifications
    History {
        #[arg(long, default_value = DEFAULT_HISTORY_FILE)]
        history_file: PathBuf,

        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::quiet()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Predict {
            image,
            model,
            annotate,
            history_file,
        } => cmd_predict(&image, &model, annotate, history_file.as_deref()),
        Commands::History {
            history_file,
            limit,
        } => cmd_history(&history_file, limit),
    }
}

fn cmd_predict(
    image_path: &Path,
    model: &Path,
    annotate: Option<PathBuf>,
    history_file: Option<&Path>,
) -> Result<()> {
    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(model, &device)
        .with_context(|| format!("Failed to load model {}", model.display()))?;

    let image = image::open(image_path)
        .with_context(|| format!("Failed to open image {}", image_path.display()))?;
    let mut diagnosis = predictor.predict_image(&image)?;
    diagnosis.image_path = Some(image_path.to_path_buf());

    println!("Image: {}", image_path.display());
    let title = match diagnosis.label {
        Label::Pneumonia => diagnosis.title().red().bold(),
        Label::Normal => diagnosis.title().green().bold(),
    };
    println!("{}", title);
    print!("{}", diagnosis.details());

    let annotation = annotate.unwrap_or_else(|| default_annotation_path(image_path));
    save_annotation(&image, &diagnosis, &annotation)?;
    println!("Annotated image: {}", annotation.display());

    if let Some(path) = history_file {
        let record = append_record(path, &image_path.display().to_string(), &diagnosis)?;
        println!("Saved to history as #{} ({})", record.id, path.display());
    }

    Ok(())
}

fn cmd_history(history_file: &Path, limit: usize) -> Result<()> {
    let records = recent_records(history_file, limit)?;
    if records.is_empty() {
        println!("No analyses recorded in {}", history_file.display());
        return Ok(());
    }

    println!("{}", "Recent Analyses:".cyan().bold());
    println!(
        "  {:>4}  {:<9}  {:>9}  {:>9}  {:<25}  {}",
        "id", "result", "pneumonia", "normal", "analyzed at", "image"
    );
    for record in records {
        println!(
            "  {:>4}  {:<9}  {:>8.2}%  {:>8.2}%  {:<25}  {}",
            record.id,
            record.result.as_str(),
            record.pneumonia_prob as f64 * 100.0,
            record.normal_prob as f64 * 100.0,
            record.analyzed_at,
            record.image
        );
    }

    Ok(())
}
