//! Local analysis history
//!
//! One JSON object per line: `{ id, image, result, pneumonia_prob, normal_prob, analyzed_at }`.
//! Ids are sequential within a file.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::predictor::{Diagnosis, Label};
use crate::utils::error::{PneumoniaError, Result};

/// Default history file used by the `classify_xray` binary
pub const DEFAULT_HISTORY_FILE: &str = "output/analysis_history.jsonl";

/// One stored classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: u64,
    pub image: String,
    pub result: Label,
    pub pneumonia_prob: f32,
    pub normal_prob: f32,
    /// RFC 3339 timestamp
    pub analyzed_at: String,
}

impl AnalysisRecord {
    pub fn new(id: u64, image: &str, diagnosis: &Diagnosis) -> Self {
        Self {
            id,
            image: image.to_string(),
            result: diagnosis.label,
            pneumonia_prob: diagnosis.pneumonia_probability,
            normal_prob: diagnosis.normal_probability,
            analyzed_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Read every record of a history file; a missing file is an empty history
pub fn read_history(path: &Path) -> Result<Vec<AnalysisRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            PneumoniaError::InvalidInput(format!(
                "{} line {}: {}",
                path.display(),
                line_no + 1,
                e
            ))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Append a diagnosis and return the stored record
pub fn append_record(path: &Path, image: &str, diagnosis: &Diagnosis) -> Result<AnalysisRecord> {
    let next_id = read_history(path)?
        .iter()
        .map(|r| r.id)
        .max()
        .map_or(1, |id| id + 1);
    let record = AnalysisRecord::new(next_id, image, diagnosis);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(&record)?)?;

    Ok(record)
}

/// The `limit` most recent records, newest first
pub fn recent_records(path: &Path, limit: usize) -> Result<Vec<AnalysisRecord>> {
    let mut records = read_history(path)?;
    records.reverse();
    records.truncate(limit);
    Ok(records)
}
