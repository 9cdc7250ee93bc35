//! Utilities module for logging, metrics, charts and helper functions
//!
//! This module provides:
//! - Structured logging with tracing
//! - Binary metrics (accuracy, ROC AUC, cross-entropy) and a classification report
//! - SVG training curves
//! - Error handling types

pub mod charts;
pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{PneumoniaError, Result};
pub use logging::init_logging;
pub use metrics::{BinaryMetrics, ClassificationReport, ConfusionMatrix};

/// Human-readable duration: `12.3s`, `4m 5s` or `2h 7m`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{:.1}s", seconds);
    }

    let whole = seconds.round() as u64;
    match whole {
        0..=3599 => format!("{}m {}s", whole / 60, whole % 60),
        _ => format!("{}h {}m", whole / 3600, (whole % 3600) / 60),
    }
}

/// Sample counts with `,` grouping, e.g. `5,216`
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let lead = digits.len() % 3;

    digits
        .char_indices()
        .fold(String::with_capacity(digits.len() + digits.len() / 3), |mut out, (i, c)| {
            if i > 0 && i % 3 == lead % 3 {
                out.push(',');
            }
            out.push(c);
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30.5), "30.5s");
        assert_eq!(format_duration(90.0), "1m 30s");
        assert_eq!(format_duration(3661.0), "1h 1m");
        assert_eq!(format_duration(59.96), "60.0s");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5216), "5,216");
        assert_eq!(format_number(1000000), "1,000,000");
        assert_eq!(format_number(16), "16");
        assert_eq!(format_number(624), "624");
        assert_eq!(format_number(0), "0");
    }
}
