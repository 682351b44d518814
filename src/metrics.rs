//! Classification metrics and their anonymization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of decimal digits kept when metrics leave the evaluator.
pub const ANONYMIZED_DECIMALS: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
/// The outcome of scoring a model against the evaluation dataset.
///
/// Precision, recall and F1 are weighted by the support of each class.
pub struct MetricsResult {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    /// The number of scored dataset items.
    pub samples: u64,
}

impl MetricsResult {
    /// Rounds every score to [`ANONYMIZED_DECIMALS`] decimal digits. Counts are kept as they are.
    pub fn anonymize(&self) -> Self {
        Self {
            accuracy: round(self.accuracy),
            precision: round(self.precision),
            recall: round(self.recall),
            f1_score: round(self.f1_score),
            samples: self.samples,
        }
    }

    /// Checks that every score lies in `[0, 1]`.
    pub fn is_bounded(&self) -> bool {
        [self.accuracy, self.precision, self.recall, self.f1_score]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

fn round(value: f64) -> f64 {
    let factor = 10_f64.powi(ANONYMIZED_DECIMALS);
    (value * factor).round() / factor
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("predictions and ground truth differ in length: {predictions} != {ground_truth}")]
    LengthMismatch {
        predictions: usize,
        ground_truth: usize,
    },
    #[error("no labels to score")]
    Empty,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// The row and column sums of one class in the confusion matrix.
struct ClassCounts {
    true_positives: u64,
    /// Samples predicted as this class.
    predicted: u64,
    /// Samples truly of this class.
    support: u64,
}

impl ClassCounts {
    fn false_positives(&self) -> u64 {
        self.predicted - self.true_positives
    }

    fn false_negatives(&self) -> u64 {
        self.support - self.true_positives
    }
}

/// Tallies the classes that occur in either sequence. Labels are arbitrary `usize` values, so
/// only the labels seen are kept.
fn class_counts(predictions: &[usize], ground_truth: &[usize]) -> BTreeMap<usize, ClassCounts> {
    let mut classes: BTreeMap<usize, ClassCounts> = BTreeMap::new();
    for (&pred, &truth) in predictions.iter().zip(ground_truth.iter()) {
        classes.entry(pred).or_default().predicted += 1;
        let counts = classes.entry(truth).or_default();
        counts.support += 1;
        if pred == truth {
            counts.true_positives += 1;
        }
    }
    classes
}

/// Computes accuracy and support-weighted precision, recall and F1.
///
/// The two sequences are paired positionally. A class without predicted (or true) samples
/// contributes a precision (or recall) of `0`.
///
/// # Errors
/// Fails if the sequences differ in length or are empty.
pub fn calculate_metrics(
    predictions: &[usize],
    ground_truth: &[usize],
) -> Result<MetricsResult, MetricsError> {
    if predictions.len() != ground_truth.len() {
        return Err(MetricsError::LengthMismatch {
            predictions: predictions.len(),
            ground_truth: ground_truth.len(),
        });
    }
    if predictions.is_empty() {
        return Err(MetricsError::Empty);
    }

    let classes = class_counts(predictions, ground_truth);
    let total = predictions.len() as f64;

    let mut correct = 0;
    let (mut precision, mut recall, mut f1_score) = (0.0, 0.0, 0.0);
    for counts in classes.values() {
        let tp = counts.true_positives as f64;
        let fp = counts.false_positives() as f64;
        let fn_ = counts.false_negatives() as f64;
        let weight = counts.support as f64 / total;

        let p = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let r = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        let f = if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 };

        correct += counts.true_positives;
        precision += weight * p;
        recall += weight * r;
        f1_score += weight * f;
    }

    Ok(MetricsResult {
        accuracy: correct as f64 / total,
        precision,
        recall,
        f1_score,
        samples: predictions.len() as u64,
    })
}
