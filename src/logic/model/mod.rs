//! Model Module - Trainable Model Capability
//!
//! Mọi detector (autoencoder, sequence model...) đều implement cùng một
//! trait `TrainableModel`. Manager và orchestrator chỉ làm việc qua trait
//! này, không quan tâm kiến trúc bên trong.

pub mod autoencoder;
pub mod classifier;
pub mod evaluation;
pub mod threshold;

use std::fmt;
use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use autoencoder::{AutoencoderConfig, LinearAutoencoder};
pub use classifier::{CentroidClassifier, LinearSeverityEstimator, SeverityEstimator, ThreatClassifier};
pub use evaluation::{binary_metrics, evaluate_detector, optimal_threshold, BinaryMetrics, DetectorReport};
pub use threshold::{percentile, ThresholdConfig};

/// Shared, immutable model handle
pub type ModelHandle = Arc<dyn TrainableModel>;

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("shape mismatch: expected {expected} columns, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("target length {targets} does not match {rows} rows")]
    TargetMismatch { rows: usize, targets: usize },

    #[error("training diverged at epoch {epoch} (loss = {loss})")]
    Diverged { epoch: usize, loss: f64 },

    #[error("no usable training rows: {0}")]
    EmptyTrainingSet(String),

    #[error("expected {expected} weights, got {actual}")]
    WeightCount { expected: usize, actual: usize },

    #[error("snapshot checksum mismatch")]
    ChecksumMismatch,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// What the model is trained against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainingTarget {
    /// Unsupervised: input is also the target
    Reconstruction,
    /// Supervised: one label per row (0 = normal, 1 = threat)
    Labels(Vec<f32>),
}

impl TrainingTarget {
    pub fn is_supervised(&self) -> bool {
        matches!(self, TrainingTarget::Labels(_))
    }
}

/// Held-out data used for val_loss and the regression gate
#[derive(Debug, Clone)]
pub struct ValidationSet {
    pub features: Array2<f32>,
    pub target: TrainingTarget,
}

impl ValidationSet {
    pub fn reconstruction(features: Array2<f32>) -> Self {
        Self { features, target: TrainingTarget::Reconstruction }
    }

    pub fn labelled(features: Array2<f32>, labels: Vec<f32>) -> Self {
        Self { features, target: TrainingTarget::Labels(labels) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitParams {
    pub epochs: usize,
    pub batch_size: usize,
}

/// Per-epoch losses returned by `fit`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl LossHistory {
    pub fn final_loss(&self) -> Option<f64> {
        self.loss.last().copied()
    }

    pub fn final_val_loss(&self) -> Option<f64> {
        self.val_loss.last().copied()
    }
}

/// Prediction output: one score and one flag per row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub scores: Vec<f32>,
    pub flags: Vec<bool>,
}

// ============================================================================
// TRAINABLE MODEL TRAIT
// ============================================================================

/// Trainable anomaly model. Threshold and weights belong to the same value,
/// so swapping a handle swaps both together.
pub trait TrainableModel: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;

    /// Expected number of input columns
    fn input_dim(&self) -> usize;

    fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Prediction, ModelError>;

    fn fit(
        &mut self,
        x: ArrayView2<'_, f32>,
        target: &TrainingTarget,
        params: FitParams,
        validation: Option<&ValidationSet>,
    ) -> Result<LossHistory, ModelError>;

    /// Loss on the given data
    fn evaluate(&self, x: ArrayView2<'_, f32>, target: &TrainingTarget) -> Result<f64, ModelError>;

    /// Independent copy (architecture + weights + threshold)
    fn clone_model(&self) -> Box<dyn TrainableModel>;

    fn weights(&self) -> Vec<f32>;

    fn set_weights(&mut self, weights: &[f32]) -> Result<(), ModelError>;

    /// Anomaly cutoff: score > threshold is anomalous
    fn threshold(&self) -> f32;

    /// Recompile with a new learning rate
    fn set_learning_rate(&mut self, learning_rate: f64);

    fn to_bytes(&self) -> Result<Vec<u8>, ModelError>;
}

// ============================================================================
// SNAPSHOT ENVELOPE
// ============================================================================

/// Checksummed snapshot bytes (model kind + sha256 of payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEnvelope {
    pub kind: String,
    pub checksum: String,
    pub payload: Vec<u8>,
}

impl SnapshotEnvelope {
    pub fn seal(model: &dyn TrainableModel) -> Result<Self, ModelError> {
        let payload = model.to_bytes()?;
        Ok(Self {
            kind: model.kind().to_string(),
            checksum: checksum(&payload),
            payload,
        })
    }

    /// Verify checksum and hand back the payload
    pub fn open(&self) -> Result<&[u8], ModelError> {
        if checksum(&self.payload) != self.checksum {
            return Err(ModelError::ChecksumMismatch);
        }
        Ok(&self.payload)
    }
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
