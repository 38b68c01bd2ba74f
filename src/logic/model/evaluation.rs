//! Detector Evaluation
//!
//! Tính binary metrics (precision/recall/F1) cho anomaly detector và tìm
//! threshold tối ưu theo F1. Không vẽ biểu đồ.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::{ModelError, TrainableModel};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub true_positives: usize,
    pub false_positives: usize,
    pub true_negatives: usize,
    pub false_negatives: usize,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Detector evaluation summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorReport {
    pub samples: usize,
    pub threshold: f32,
    pub metrics: BinaryMetrics,
    /// Threshold maximising F1 on the same data
    pub optimal_threshold: f32,
    pub optimal_metrics: BinaryMetrics,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Confusion counts and derived ratios. Pairs beyond the shorter slice are ignored.
pub fn binary_metrics(truth: &[bool], predicted: &[bool]) -> BinaryMetrics {
    let mut m = BinaryMetrics::default();
    for (t, p) in truth.iter().zip(predicted) {
        match (t, p) {
            (true, true) => m.true_positives += 1,
            (false, true) => m.false_positives += 1,
            (false, false) => m.true_negatives += 1,
            (true, false) => m.false_negatives += 1,
        }
    }

    let total = m.true_positives + m.false_positives + m.true_negatives + m.false_negatives;
    m.accuracy = ratio(m.true_positives + m.true_negatives, total);
    m.precision = ratio(m.true_positives, m.true_positives + m.false_positives);
    m.recall = ratio(m.true_positives, m.true_positives + m.false_negatives);
    m.f1 = if m.precision + m.recall > 0.0 {
        2.0 * m.precision * m.recall / (m.precision + m.recall)
    } else {
        0.0
    };
    m
}

/// Threshold (score > t is positive) with the best F1.
/// Candidates are midpoints between distinct sorted scores; ties keep the lowest.
pub fn optimal_threshold(truth: &[bool], scores: &[f32]) -> f32 {
    let mut sorted: Vec<f32> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();

    if sorted.is_empty() {
        return 0.0;
    }

    let mut candidates = vec![sorted[0] - 1.0];
    candidates.extend(sorted.windows(2).map(|w| (w[0] + w[1]) / 2.0));

    let mut best = (candidates[0], -1.0f64);
    for candidate in candidates {
        let predicted: Vec<bool> = scores.iter().map(|s| *s > candidate).collect();
        let f1 = binary_metrics(truth, &predicted).f1;
        if f1 > best.1 {
            best = (candidate, f1);
        }
    }
    best.0
}

/// Score `x` with the model and compare against ground truth
pub fn evaluate_detector(
    model: &dyn TrainableModel,
    x: ArrayView2<'_, f32>,
    truth: &[bool],
) -> Result<DetectorReport, ModelError> {
    let prediction = model.predict(x)?;
    let metrics = binary_metrics(truth, &prediction.flags);

    let optimal = optimal_threshold(truth, &prediction.scores);
    let optimal_flags: Vec<bool> = prediction.scores.iter().map(|s| *s > optimal).collect();

    Ok(DetectorReport {
        samples: prediction.scores.len(),
        threshold: model.threshold(),
        metrics,
        optimal_threshold: optimal,
        optimal_metrics: binary_metrics(truth, &optimal_flags),
    })
}
