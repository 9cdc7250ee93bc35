//! Inference module for single-image classification
//!
//! This module provides:
//! - Artifact loading and prediction (`predictor`)
//! - Annotated result images (`annotate`)
//! - A local JSON-lines analysis history (`history`)

pub mod annotate;
pub mod history;
pub mod predictor;

pub use annotate::{default_annotation_path, render_annotation, save_annotation};
pub use history::{append_record, read_history, recent_records, AnalysisRecord};
pub use predictor::{Diagnosis, Label, Predictor};
