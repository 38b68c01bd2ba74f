//! Detection Types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::logic::learning::FeedbackCounts;

// ============================================================================
// SEVERITY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Low,
    Medium,
    High,
}

impl SeverityLevel {
    /// `> t` high, `> t/2` medium, else low
    pub fn from_score(score: f32, threshold: f64) -> Self {
        let score = score as f64;
        if score > threshold {
            SeverityLevel::High
        } else if score > threshold / 2.0 {
            SeverityLevel::Medium
        } else {
            SeverityLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SeverityLevel::Low => "low",
            SeverityLevel::Medium => "medium",
            SeverityLevel::High => "high",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityInfo {
    pub score: f32,
    pub level: SeverityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationInfo {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub all_probabilities: BTreeMap<String, f32>,
}

// ============================================================================
// RESULTS
// ============================================================================

/// Result of scoring one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub event_id: String,
    pub timestamp: f64,
    pub event_type: String,
    pub anomaly_score: f32,
    pub is_anomaly: bool,
    /// score / threshold, 0 when threshold <= 0
    pub confidence: f32,
    pub model_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<SeverityInfo>,
}

/// Result of scoring a sequence: the most anomalous window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceResult {
    pub sequence_id: String,
    pub timestamp_start: f64,
    pub timestamp_end: f64,
    pub event_type: String,
    pub sequence_length: usize,
    pub anomaly_score: f32,
    pub is_anomaly: bool,
    pub confidence: f32,
    pub model_version: u32,
    /// Indices of the selected window's events
    pub anomalous_event_indices: Vec<usize>,
    pub windows_evaluated: usize,
}

// ============================================================================
// HISTORY RECORD
// ============================================================================

/// Anomalous detection kept for feedback lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: String,
    /// Event timestamp, or window start for sequences
    pub timestamp: f64,
    pub event_type: String,
    pub anomaly_score: f32,
    pub is_sequence: bool,
    /// Class name or "unknown"; `None` for sequences
    pub classification: Option<String>,
    /// Severity level or "unknown"; `None` for sequences
    pub severity: Option<String>,
    pub features: Option<Vec<f32>>,
    #[serde(default)]
    pub sequence_length: Option<usize>,
    #[serde(default)]
    pub timestamp_end: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionStats {
    pub detection_count: u64,
    pub false_positive_count: u64,
    pub history_len: usize,
    pub anomaly_model_version: Option<u32>,
    pub sequence_model_version: Option<u32>,
    pub feedback: Option<FeedbackCounts>,
}
