//! Epoch-level multi-label metrics
//!
//! This module holds the types produced at the end of a phase: per-class
//! confusion matrices, the classification report and the [`MetricsBundle`]
//! that carries the micro-averaged scalars to reporting and best-tracking.

pub mod aggregator;
pub mod report;

pub use aggregator::EpochAggregator;
pub use report::{ClassReport, ClassificationReport};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MonitorName;
use crate::training::step::StepOutput;

/// Ordered label names, one per model output column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassNames(Vec<String>);

impl ClassNames {
    /// Wrap an ordered list of names
    pub fn new(names: Vec<String>) -> Self {
        Self(names)
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no classes are known
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names in column order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Names as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl From<Vec<String>> for ClassNames {
    fn from(names: Vec<String>) -> Self {
        Self(names)
    }
}

impl From<&[&str]> for ClassNames {
    fn from(names: &[&str]) -> Self {
        Self(names.iter().map(|n| n.to_string()).collect())
    }
}

/// Step outputs collected during one phase-epoch
#[derive(Debug, Default)]
pub struct PhaseBuffer {
    outputs: Vec<StepOutput>,
}

impl PhaseBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one batch's output
    pub fn push(&mut self, output: StepOutput) {
        self.outputs.push(output);
    }

    /// Buffered batches
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether nothing was buffered
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Buffered outputs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &StepOutput> {
        self.outputs.iter()
    }
}

impl FromIterator<StepOutput> for PhaseBuffer {
    fn from_iter<I: IntoIterator<Item = StepOutput>>(iter: I) -> Self {
        Self {
            outputs: iter.into_iter().collect(),
        }
    }
}

/// Per-class sample counts laid out as `[[TN, FP], [FN, TP]]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Label absent, not predicted
    pub true_negatives: u64,
    /// Label absent, predicted
    pub false_positives: u64,
    /// Label present, not predicted
    pub false_negatives: u64,
    /// Label present, predicted
    pub true_positives: u64,
}

impl ConfusionMatrix {
    /// Count one (target, prediction) pair
    pub fn record(&mut self, target: bool, predicted: bool) {
        match (target, predicted) {
            (false, false) => self.true_negatives += 1,
            (false, true) => self.false_positives += 1,
            (true, false) => self.false_negatives += 1,
            (true, true) => self.true_positives += 1,
        }
    }

    /// Row-major `[[TN, FP], [FN, TP]]`
    pub fn as_array(&self) -> [[u64; 2]; 2] {
        [
            [self.true_negatives, self.false_positives],
            [self.false_negatives, self.true_positives],
        ]
    }

    /// Samples counted
    pub fn total(&self) -> u64 {
        self.true_negatives + self.false_positives + self.false_negatives + self.true_positives
    }

    /// Samples carrying the label
    pub fn support(&self) -> u64 {
        self.true_positives + self.false_negatives
    }

    /// TP / (TP + FP), 0 when nothing was predicted
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// TP / (TP + FN), 0 when the label never occurs
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.support())
    }

    /// Harmonic mean of precision and recall
    pub fn f1_score(&self) -> f64 {
        f1(self.precision(), self.recall())
    }
}

impl std::ops::AddAssign for ConfusionMatrix {
    fn add_assign(&mut self, other: Self) {
        self.true_negatives += other.true_negatives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.true_positives += other.true_positives;
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [[tn, fp], [fn_, tp]] = self.as_array();
        let width = [tn, fp, fn_, tp]
            .iter()
            .map(|v| v.to_string().len())
            .max()
            .unwrap_or(1);
        writeln!(f, "[[{tn:>width$} {fp:>width$}]")?;
        write!(f, " [{fn_:>width$} {tp:>width$}]]")
    }
}

/// Ratio with the zero-denominator convention of 0
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// F1 from precision and recall, 0 when both are 0
pub(crate) fn f1(precision: f64, recall: f64) -> f64 {
    if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    }
}

/// Metrics for one phase-epoch
#[derive(Debug, Clone, Serialize)]
pub struct MetricsBundle {
    /// Micro-averaged precision
    pub precision: f64,
    /// Micro-averaged recall
    pub recall: f64,
    /// Micro-averaged F1
    pub f1_score: f64,
    /// Mean of per-batch losses
    pub loss: f64,
    /// One matrix per class, in class order
    pub confusion_matrices: Vec<ConfusionMatrix>,
    /// Per-class breakdown
    pub report: ClassificationReport,
    /// Samples aggregated
    pub num_samples: usize,
}

impl MetricsBundle {
    /// Scalar by monitor name
    pub fn get(&self, name: MonitorName) -> f64 {
        match name {
            MonitorName::Loss => self.loss,
            MonitorName::Precision => self.precision,
            MonitorName::Recall => self.recall,
            MonitorName::F1Score => self.f1_score,
        }
    }

    /// The four scalars keyed as `{prefix}{name}`
    pub fn scalars(&self, prefix: &str) -> BTreeMap<String, f64> {
        MonitorName::ALL
            .iter()
            .map(|name| (format!("{prefix}{name}"), self.get(*name)))
            .collect()
    }

    /// Number of classes covered
    pub fn num_classes(&self) -> usize {
        self.confusion_matrices.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_record_and_layout() {
        let mut cm = ConfusionMatrix::default();
        for (t, p) in [(false, false), (false, true), (true, false), (true, true), (true, true)] {
            cm.record(t, p);
        }
        assert_eq!(cm.as_array(), [[1, 1], [1, 2]]);
        assert_eq!(cm.total(), 5);
        assert_eq!(cm.support(), 3);
        assert!((cm.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((cm.recall() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_ratios_are_zero() {
        let cm = ConfusionMatrix {
            true_negatives: 7,
            ..Default::default()
        };
        assert_eq!(cm.precision(), 0.0);
        assert_eq!(cm.recall(), 0.0);
        assert_eq!(cm.f1_score(), 0.0);
    }

    #[test]
    fn test_confusion_matrix_display() {
        let cm = ConfusionMatrix {
            true_negatives: 12,
            false_positives: 3,
            false_negatives: 0,
            true_positives: 5,
        };
        assert_eq!(cm.to_string(), "[[12  3]\n [ 0  5]]");
    }

    #[test]
    fn test_class_names_conversions() {
        let names = ClassNames::from(&["a", "b"][..]);
        assert_eq!(names.len(), 2);
        assert_eq!(names.iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
