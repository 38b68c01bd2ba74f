//! Continual Learning Types
//!
//! Data model: sample, feedback item, version entry, update outcome.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::model::ModelHandle;

// ============================================================================
// SAMPLE
// ============================================================================

/// One buffered training row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub features: Vec<f32>,
    /// 0 = normal, 1 = threat; `None` for unlabeled rows
    pub label: Option<i32>,
    /// Epoch seconds
    pub timestamp: f64,
}

impl Sample {
    pub fn new(features: Vec<f32>, label: Option<i32>, timestamp: f64) -> Self {
        Self { features, label, timestamp }
    }
}

/// Sample buffer statistics (persisted as `buffer_stats.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    pub sample_count: usize,
    /// Every buffered sample carries a label
    pub has_labels: bool,
    /// (oldest, newest) epoch seconds
    pub timestamp_range: Option<(f64, f64)>,
}

// ============================================================================
// FEEDBACK
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackCategory {
    FalsePositive,
    FalseNegative,
    Misclassification,
}

impl fmt::Display for FeedbackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeedbackCategory::FalsePositive => "false_positive",
            FeedbackCategory::FalseNegative => "false_negative",
            FeedbackCategory::Misclassification => "misclassification",
        };
        write!(f, "{}", s)
    }
}

/// What the model said: a class name or a raw score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicted {
    Class(String),
    Score(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub features: Vec<f32>,
    pub category: FeedbackCategory,
    #[serde(default)]
    pub predicted: Option<Predicted>,
    #[serde(default)]
    pub actual: Option<String>,
    /// Epoch seconds
    pub timestamp: f64,
}

impl FeedbackItem {
    pub fn new(category: FeedbackCategory, features: Vec<f32>, timestamp: f64) -> Self {
        Self {
            features,
            category,
            predicted: None,
            actual: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackCounts {
    pub false_positives: usize,
    pub false_negatives: usize,
    pub misclassifications: usize,
}

/// Result of `FeedbackAggregator::process`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "update", rename_all = "snake_case")]
pub enum FeedbackOutcome {
    /// Neither threshold reached, buffers untouched
    NoAction,
    /// Feedback moved into the sample buffer, update not yet eligible
    Buffered,
    /// Feedback moved and an update cycle ran
    Update(UpdateOutcome),
}

// ============================================================================
// VERSIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateMetrics {
    pub final_loss: f64,
    #[serde(default)]
    pub final_val_loss: Option<f64>,
    /// (old_loss - new_loss) / old_loss on validation data
    #[serde(default)]
    pub performance_change: Option<f64>,
}

/// One entry of the version ledger. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct ModelVersion {
    pub version: u32,
    /// `None` for entries restored from disk without their snapshot
    pub snapshot: Option<ModelHandle>,
    pub created_at: DateTime<Utc>,
    pub metrics: Option<UpdateMetrics>,
    pub parent_version: Option<u32>,
    pub rollback_source: Option<u32>,
}

impl ModelVersion {
    pub fn info(&self) -> VersionInfo {
        VersionInfo {
            version: self.version,
            timestamp: self.created_at,
            metrics: self.metrics.clone(),
            parent_version: self.parent_version,
            rollback_from: self.rollback_source,
        }
    }
}

/// Snapshot-free view of a version (metadata / persistence)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metrics: Option<UpdateMetrics>,
    #[serde(default)]
    pub parent_version: Option<u32>,
    #[serde(default)]
    pub rollback_from: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub final_loss: f64,
    pub final_val_loss: Option<f64>,
}

// ============================================================================
// UPDATE OUTCOME
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    /// Relative validation loss got worse by more than the threshold
    PerformanceRegression { degradation: f64 },
    TrainingFailed { message: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::PerformanceRegression { degradation } => {
                write!(f, "performance degraded by {:.2}%", degradation * 100.0)
            }
            RejectionReason::TrainingFailed { message } => write!(f, "training failed: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    /// Present when training finished before the gate rejected it
    pub metrics: Option<UpdateMetrics>,
}

/// Result of one update cycle. Rejection is a routine outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Not eligible (time or sample count), buffer untouched
    Skipped,
    /// Another update holds the update lock, buffer untouched
    InProgress,
    Committed {
        version: u32,
        metrics: UpdateMetrics,
        timestamp: DateTime<Utc>,
    },
    Rejected(Rejection),
}

impl UpdateOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, UpdateOutcome::Committed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, UpdateOutcome::Rejected(_))
    }
}
