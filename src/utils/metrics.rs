//! Metrics Module for Model Evaluation
//!
//! Binary-classification metrics for the pneumonia classifier:
//! - Accuracy at the 0.5 decision threshold
//! - ROC AUC (exact rank statistic)
//! - Binary cross-entropy on probabilities
//! - Per-class precision, recall, F1 and support
//! - Confusion matrix

use serde::{Deserialize, Serialize};

use crate::DECISION_THRESHOLD;

/// Clamp applied to probabilities before taking logarithms
pub const PROBABILITY_EPSILON: f64 = 1e-7;

/// Map a probability to a class index using the decision threshold
pub fn predicted_class(probability: f32) -> usize {
    usize::from(probability > DECISION_THRESHOLD)
}

/// Binary cross-entropy of a single probability against a {0,1} label
pub fn binary_cross_entropy(probability: f32, label: usize) -> f64 {
    let p = (probability as f64).clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON);
    if label == 1 {
        -p.ln()
    } else {
        -(1.0 - p).ln()
    }
}

/// Area under the ROC curve.
///
/// Computed as the normalised Mann-Whitney U statistic with tied scores
/// sharing their average rank. Returns 0.0 when only one class is present.
pub fn roc_auc(scores: &[f32], labels: &[usize]) -> f64 {
    assert_eq!(
        scores.len(),
        labels.len(),
        "Scores and labels must have same length"
    );

    let n = scores.len();
    let n_pos = labels.iter().filter(|&&l| l == 1).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.0;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut positive_rank_sum = 0.0f64;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }

        // ranks are 1-based
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] == 1 {
                positive_rank_sum += average_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Aggregate scalar metrics for one pass over a split
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub auc: f64,
}

impl BinaryMetrics {
    /// Compute metrics directly from probabilities and labels
    pub fn from_probabilities(probabilities: &[f32], labels: &[usize]) -> Self {
        let mut tracker = BinaryTracker::new();
        tracker.add_samples(probabilities, labels);
        tracker.metrics()
    }

    /// Print the summary as `key: value` lines
    pub fn display(&self) -> String {
        format!(
            "loss: {:.4}\naccuracy: {:.4}\nauc: {:.4}\n",
            self.loss, self.accuracy, self.auc
        )
    }
}

/// Accumulates predictions over an epoch
///
/// Loss is either supplied per batch (training, where the loss comes from the
/// autodiff graph) or derived per sample from the probabilities.
#[derive(Debug, Clone, Default)]
pub struct BinaryTracker {
    probabilities: Vec<f32>,
    labels: Vec<usize>,
    loss: RunningAverage,
}

impl BinaryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a batch with its mean loss, weighted by batch size
    pub fn add_batch(&mut self, probabilities: &[f32], labels: &[usize], batch_loss: f64) {
        self.loss.add_weighted(batch_loss, probabilities.len());
        self.probabilities.extend_from_slice(probabilities);
        self.labels.extend_from_slice(labels);
    }

    /// Add samples and compute their loss from the probabilities
    pub fn add_samples(&mut self, probabilities: &[f32], labels: &[usize]) {
        for (&p, &label) in probabilities.iter().zip(labels.iter()) {
            self.loss.add(binary_cross_entropy(p, label));
        }
        self.probabilities.extend_from_slice(probabilities);
        self.labels.extend_from_slice(labels);
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn accuracy(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        let correct = self
            .probabilities
            .iter()
            .zip(self.labels.iter())
            .filter(|&(&p, &label)| predicted_class(p) == label)
            .count();
        correct as f64 / self.labels.len() as f64
    }

    pub fn auc(&self) -> f64 {
        roc_auc(&self.probabilities, &self.labels)
    }

    pub fn mean_loss(&self) -> f64 {
        self.loss.average()
    }

    pub fn metrics(&self) -> BinaryMetrics {
        BinaryMetrics {
            loss: self.mean_loss(),
            accuracy: self.accuracy(),
            auc: self.auc(),
        }
    }

    /// Thresholded class predictions
    pub fn predictions(&self) -> Vec<usize> {
        self.probabilities.iter().map(|&p| predicted_class(p)).collect()
    }

    pub fn probabilities(&self) -> &[f32] {
        &self.probabilities
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }
}

/// Per-class metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Class index
    pub class_idx: usize,

    /// Class name (if available)
    pub class_name: Option<String>,

    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub true_negatives: usize,

    /// Precision = TP / (TP + FP)
    pub precision: f64,

    /// Recall = TP / (TP + FN)
    pub recall: f64,

    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,

    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    /// Calculate metrics for a class from confusion matrix
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        // predicted as this class but actually another
        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        // actually this class but predicted as another
        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let true_negatives = cm.total() - true_positives - false_positives - false_negatives;
        let support = true_positives + false_negatives;

        let precision = if true_positives + false_positives > 0 {
            true_positives as f64 / (true_positives + false_positives) as f64
        } else {
            0.0
        };

        let recall = if support > 0 {
            true_positives as f64 / support as f64
        } else {
            0.0
        };

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            class_name: None,
            true_positives,
            false_positives,
            false_negatives,
            true_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }

    /// Set the class name
    pub fn with_name(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }

    fn label(&self) -> String {
        self.class_name
            .clone()
            .unwrap_or_else(|| self.class_idx.to_string())
    }
}

/// Averaged precision/recall/F1 row of a report
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AverageMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Per-class precision/recall/F1 report with macro and weighted averages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub per_class: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: AverageMetrics,
    pub weighted_avg: AverageMetrics,
    pub total_support: usize,
    pub confusion_matrix: ConfusionMatrix,
}

impl ClassificationReport {
    /// Build a report from thresholded predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        class_names: &[String],
    ) -> Self {
        assert_eq!(
            predictions.len(),
            ground_truth.len(),
            "Predictions and ground truth must have same length"
        );

        let num_classes = class_names.len();
        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let per_class: Vec<ClassMetrics> = class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| ClassMetrics::from_confusion_matrix(&confusion_matrix, idx).with_name(name))
            .collect();

        let total_support: usize = per_class.iter().map(|m| m.support).sum();

        let macro_avg = if num_classes > 0 {
            let n = num_classes as f64;
            AverageMetrics {
                precision: per_class.iter().map(|m| m.precision).sum::<f64>() / n,
                recall: per_class.iter().map(|m| m.recall).sum::<f64>() / n,
                f1: per_class.iter().map(|m| m.f1).sum::<f64>() / n,
            }
        } else {
            AverageMetrics::default()
        };

        let weighted_avg = if total_support > 0 {
            let weight = |f: fn(&ClassMetrics) -> f64| {
                per_class
                    .iter()
                    .map(|m| f(m) * m.support as f64)
                    .sum::<f64>()
                    / total_support as f64
            };
            AverageMetrics {
                precision: weight(|m| m.precision),
                recall: weight(|m| m.recall),
                f1: weight(|m| m.f1),
            }
        } else {
            AverageMetrics::default()
        };

        Self {
            per_class,
            accuracy: confusion_matrix.accuracy(),
            macro_avg,
            weighted_avg,
            total_support,
            confusion_matrix,
        }
    }

    /// Render the report as an aligned text table
    pub fn display(&self) -> String {
        let width = self
            .per_class
            .iter()
            .map(|m| m.label().len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        let mut output = String::new();
        output.push_str(&format!(
            "{:>width$} {:>9} {:>9} {:>9} {:>9}\n\n",
            "",
            "precision",
            "recall",
            "f1-score",
            "support",
            width = width
        ));

        for m in &self.per_class {
            output.push_str(&format!(
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
                m.label(),
                m.precision,
                m.recall,
                m.f1,
                m.support,
                width = width
            ));
        }
        output.push('\n');

        output.push_str(&format!(
            "{:>width$} {:>9} {:>9} {:>9.2} {:>9}\n",
            "accuracy",
            "",
            "",
            self.accuracy,
            self.total_support,
            width = width
        ));
        for (name, avg) in [("macro avg", &self.macro_avg), ("weighted avg", &self.weighted_avg)] {
            output.push_str(&format!(
                "{:>width$} {:>9.2} {:>9.2} {:>9.2} {:>9}\n",
                name,
                avg.precision,
                avg.recall,
                avg.f1,
                self.total_support,
                width = width
            ));
        }

        output
    }
}

impl std::fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// Confusion Matrix (row = actual, column = predicted), flat row-major storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Diagonal sum
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Pretty print the confusion matrix
    pub fn display(&self, class_names: Option<&[String]>) -> String {
        let name = |idx: usize| -> String {
            class_names
                .and_then(|names| names.get(idx))
                .cloned()
                .unwrap_or_else(|| idx.to_string())
        };

        let mut output = String::new();
        output.push_str("\nConfusion Matrix (rows=actual, cols=predicted):\n\n");

        output.push_str(&format!("{:>12}", ""));
        for col in 0..self.num_classes {
            output.push_str(&format!("{:>12}", name(col)));
        }
        output.push('\n');

        for row in 0..self.num_classes {
            output.push_str(&format!("{:>12}", name(row)));
            for col in 0..self.num_classes {
                output.push_str(&format!("{:>12}", self.get(row, col)));
            }
            output.push('\n');
        }

        output
    }

    /// Save confusion matrix to CSV
    pub fn save_csv(&self, path: &std::path::Path, class_names: &[String]) -> std::io::Result<()> {
        let mut content = String::new();

        content.push_str("actual\\predicted");
        for col in 0..self.num_classes {
            let label = class_names.get(col).cloned().unwrap_or_else(|| col.to_string());
            content.push_str(&format!(",{}", label));
        }
        content.push('\n');

        for row in 0..self.num_classes {
            let label = class_names.get(row).cloned().unwrap_or_else(|| row.to_string());
            content.push_str(&label);
            for col in 0..self.num_classes {
                content.push_str(&format!(",{}", self.get(row, col)));
            }
            content.push('\n');
        }

        std::fs::write(path, content)
    }
}

/// Weighted running average for tracking losses during training
#[derive(Debug, Clone, Default)]
pub struct RunningAverage {
    sum: f64,
    count: usize,
}

impl RunningAverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single value
    pub fn add(&mut self, value: f64) {
        self.add_weighted(value, 1);
    }

    /// Add a value that stands for `weight` samples (e.g. a batch mean)
    pub fn add_weighted(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.count += weight;
    }

    pub fn average(&self) -> f64 {
        if self.count > 0 {
            self.sum / self.count as f64
        } else {
            0.0
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["NORMAL".to_string(), "PNEUMONIA".to_string()]
    }

    #[test]
    fn test_predicted_class_threshold() {
        assert_eq!(predicted_class(0.5), 0);
        assert_eq!(predicted_class(0.500001), 1);
        assert_eq!(predicted_class(0.0), 0);
        assert_eq!(predicted_class(1.0), 1);
    }

    #[test]
    fn test_binary_cross_entropy() {
        assert!((binary_cross_entropy(0.5, 1) - std::f64::consts::LN_2).abs() < 1e-6);
        assert!((binary_cross_entropy(0.5, 0) - std::f64::consts::LN_2).abs() < 1e-6);
        // clamped, finite even at the extremes
        assert!(binary_cross_entropy(0.0, 1).is_finite());
        assert!(binary_cross_entropy(1.0, 0).is_finite());
        assert!(binary_cross_entropy(0.99, 1) < binary_cross_entropy(0.6, 1));
    }

    #[test]
    fn test_roc_auc_perfect_and_inverted() {
        let labels = vec![0, 0, 1, 1];
        assert!((roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels) - 1.0).abs() < 1e-12);
        assert!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_ties_and_partial() {
        // all scores equal: chance level
        assert!((roc_auc(&[0.5; 4], &[0, 1, 0, 1]) - 0.5).abs() < 1e-12);

        // one of four positive/negative pairs misordered
        let scores = [0.1, 0.6, 0.4, 0.9];
        let labels = [0, 0, 1, 1];
        assert!((roc_auc(&scores, &labels) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_roc_auc_single_class() {
        assert_eq!(roc_auc(&[0.3, 0.7], &[1, 1]), 0.0);
    }

    #[test]
    fn test_binary_tracker() {
        let mut tracker = BinaryTracker::new();
        tracker.add_batch(&[0.9, 0.2], &[1, 0], 0.2);
        tracker.add_batch(&[0.7, 0.6], &[0, 1], 0.6);

        assert_eq!(tracker.len(), 4);
        assert!((tracker.accuracy() - 0.75).abs() < 1e-12);
        assert!((tracker.mean_loss() - 0.4).abs() < 1e-12);
        assert_eq!(tracker.predictions(), vec![1, 0, 1, 1]);
    }

    #[test]
    fn test_binary_metrics_from_probabilities() {
        let metrics = BinaryMetrics::from_probabilities(&[0.9, 0.1], &[1, 0]);
        assert_eq!(metrics.accuracy, 1.0);
        assert_eq!(metrics.auc, 1.0);
        let expected = -(0.9f32 as f64).ln();
        assert!((metrics.loss - expected).abs() < 1e-6);
        assert!(metrics.display().starts_with("loss: "));
    }

    #[test]
    fn test_class_metrics() {
        let predictions = vec![0, 0, 0, 1, 1];
        let ground_truth = vec![0, 0, 1, 1, 0];

        let cm = ConfusionMatrix::from_predictions(&predictions, &ground_truth, 2);
        let class0 = ClassMetrics::from_confusion_matrix(&cm, 0);

        // Class 0: TP=2, FP=1, FN=1, TN=1
        assert_eq!(class0.true_positives, 2);
        assert_eq!(class0.false_positives, 1);
        assert_eq!(class0.false_negatives, 1);
        assert_eq!(class0.true_negatives, 1);
        assert!((class0.precision - 2.0 / 3.0).abs() < 0.001);
        assert!((class0.recall - 2.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_classification_report() {
        // NORMAL: 3 samples, 2 correct; PNEUMONIA: 5 samples, 5 correct
        let ground_truth = vec![0, 0, 0, 1, 1, 1, 1, 1];
        let predictions = vec![0, 0, 1, 1, 1, 1, 1, 1];

        let report = ClassificationReport::from_predictions(&predictions, &ground_truth, &names());

        assert_eq!(report.total_support, 8);
        assert!((report.accuracy - 7.0 / 8.0).abs() < 1e-12);

        let normal = &report.per_class[0];
        assert_eq!(normal.support, 3);
        assert!((normal.precision - 1.0).abs() < 1e-12);
        assert!((normal.recall - 2.0 / 3.0).abs() < 1e-12);

        let pneumonia = &report.per_class[1];
        assert!((pneumonia.precision - 5.0 / 6.0).abs() < 1e-12);
        assert!((pneumonia.recall - 1.0).abs() < 1e-12);

        let expected_macro_recall = (2.0 / 3.0 + 1.0) / 2.0;
        assert!((report.macro_avg.recall - expected_macro_recall).abs() < 1e-12);
        // weighted recall equals accuracy
        assert!((report.weighted_avg.recall - report.accuracy).abs() < 1e-12);

        let text = report.display();
        assert!(text.contains("precision"));
        assert!(text.contains("PNEUMONIA"));
        assert!(text.contains("weighted avg"));
    }

    #[test]
    fn test_confusion_matrix_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cm.csv");
        let cm = ConfusionMatrix::from_predictions(&[0, 1, 1], &[0, 0, 1], 2);
        cm.save_csv(&path, &names()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("actual\\predicted,NORMAL,PNEUMONIA"));
        assert!(content.contains("NORMAL,1,1"));
        assert!(content.contains("PNEUMONIA,0,1"));
    }

    #[test]
    fn test_running_average() {
        let mut avg = RunningAverage::new();

        avg.add(1.0);
        avg.add(2.0);
        avg.add_weighted(3.0, 2);

        assert_eq!(avg.count(), 4);
        assert!((avg.average() - 2.25).abs() < 0.001);

        avg.reset();
        assert_eq!(avg.count(), 0);
        assert_eq!(avg.average(), 0.0);
    }
}
