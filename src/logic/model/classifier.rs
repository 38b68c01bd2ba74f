//! Threat Classifier & Severity Estimator
//!
//! Collaborator tùy chọn cho orchestrator: phân loại threat (phân phối xác
//! suất theo class) và ước lượng severity (scalar trong [0, 1]).

use ndarray::{Array2, ArrayView2, Axis};

use super::ModelError;

// ============================================================================
// TRAITS
// ============================================================================

pub trait ThreatClassifier: Send + Sync {
    fn class_names(&self) -> &[String];

    /// One probability row per input row, columns ordered as `class_names`
    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>, ModelError>;
}

pub trait SeverityEstimator: Send + Sync {
    /// One severity score in [0, 1] per input row
    fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Vec<f32>, ModelError>;
}

// ============================================================================
// NEAREST CENTROID CLASSIFIER
// ============================================================================

/// Nearest-centroid classifier, softmax over negative squared distances
#[derive(Debug, Clone)]
pub struct CentroidClassifier {
    class_names: Vec<String>,
    centroids: Array2<f32>,
}

impl CentroidClassifier {
    pub fn new(class_names: Vec<String>, centroids: Array2<f32>) -> Result<Self, ModelError> {
        if class_names.len() != centroids.nrows() {
            return Err(ModelError::TargetMismatch {
                rows: centroids.nrows(),
                targets: class_names.len(),
            });
        }
        Ok(Self { class_names, centroids })
    }

    /// Centroid per class from labelled rows (label = class index)
    pub fn fit(class_names: Vec<String>, x: ArrayView2<'_, f32>, labels: &[usize]) -> Result<Self, ModelError> {
        if labels.len() != x.nrows() {
            return Err(ModelError::TargetMismatch { rows: x.nrows(), targets: labels.len() });
        }

        let mut centroids = Array2::<f32>::zeros((class_names.len(), x.ncols()));
        let mut counts = vec![0usize; class_names.len()];

        for (row, &label) in x.axis_iter(Axis(0)).zip(labels) {
            if label >= class_names.len() {
                return Err(ModelError::Other(format!("label {} has no class name", label)));
            }
            let mut centroid = centroids.row_mut(label);
            centroid += &row;
            counts[label] += 1;
        }

        for (mut centroid, count) in centroids.axis_iter_mut(Axis(0)).zip(&counts) {
            if *count > 0 {
                centroid /= *count as f32;
            }
        }

        Self::new(class_names, centroids)
    }
}

impl ThreatClassifier for CentroidClassifier {
    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn predict_proba(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>, ModelError> {
        if x.ncols() != self.centroids.ncols() {
            return Err(ModelError::ShapeMismatch {
                expected: self.centroids.ncols(),
                actual: x.ncols(),
            });
        }

        let mut probs = Array2::<f32>::zeros((x.nrows(), self.centroids.nrows()));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let logits: Vec<f32> = self
                .centroids
                .axis_iter(Axis(0))
                .map(|c| -(&row - &c).mapv(|v| v * v).sum())
                .collect();
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
            let total: f32 = exps.iter().sum();
            for (j, e) in exps.iter().enumerate() {
                probs[[i, j]] = e / total;
            }
        }
        Ok(probs)
    }
}

// ============================================================================
// LINEAR SEVERITY ESTIMATOR
// ============================================================================

/// sigmoid(w · x + b)
#[derive(Debug, Clone)]
pub struct LinearSeverityEstimator {
    weights: Vec<f32>,
    bias: f32,
}

impl LinearSeverityEstimator {
    pub fn new(weights: Vec<f32>, bias: f32) -> Self {
        Self { weights, bias }
    }
}

impl SeverityEstimator for LinearSeverityEstimator {
    fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Vec<f32>, ModelError> {
        if x.ncols() != self.weights.len() {
            return Err(ModelError::ShapeMismatch {
                expected: self.weights.len(),
                actual: x.ncols(),
            });
        }

        Ok(x.axis_iter(Axis(0))
            .map(|row| {
                let z: f32 = row.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f32>() + self.bias;
                1.0 / (1.0 + (-z).exp())
            })
            .collect())
    }
}
