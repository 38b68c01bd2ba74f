//! Engine Configuration
//!
//! Mỗi engine có config riêng (serde + Default). `EngineConfig` gom lại để
//! load từ một file JSON duy nhất.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field, reason: reason.into() }
}

// ============================================================================
// CONTINUAL LEARNING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Hours between model updates
    pub update_frequency_hours: f64,
    pub min_samples_for_update: usize,
    /// History capacity, base version included
    pub max_history_models: usize,
    /// Maximum allowed relative loss degradation
    pub performance_threshold: f64,
    /// Incremental learning rate
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub max_buffer_size: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            update_frequency_hours: DEFAULT_UPDATE_FREQUENCY_HOURS,
            min_samples_for_update: DEFAULT_MIN_SAMPLES_FOR_UPDATE,
            max_history_models: DEFAULT_MAX_HISTORY_MODELS,
            performance_threshold: DEFAULT_PERFORMANCE_THRESHOLD,
            learning_rate: DEFAULT_CONTINUAL_LEARNING_RATE,
            batch_size: DEFAULT_BATCH_SIZE,
            epochs: DEFAULT_EPOCHS,
            max_buffer_size: DEFAULT_SAMPLE_BUFFER_SIZE,
        }
    }
}

impl LearningConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.update_frequency_hours.is_finite() || self.update_frequency_hours < 0.0 {
            return Err(invalid("update_frequency_hours", "must be a non-negative number"));
        }
        if self.max_history_models < 2 {
            return Err(invalid("max_history_models", "must keep the base version and at least one more"));
        }
        if !self.performance_threshold.is_finite() || self.performance_threshold < 0.0 {
            return Err(invalid("performance_threshold", "must be a non-negative number"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(invalid("learning_rate", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if self.epochs == 0 {
            return Err(invalid("epochs", "must be at least 1"));
        }
        if self.max_buffer_size == 0 {
            return Err(invalid("max_buffer_size", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// FEEDBACK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub min_feedback_for_update: usize,
    pub max_buffer_size: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            min_feedback_for_update: DEFAULT_MIN_FEEDBACK_FOR_UPDATE,
            max_buffer_size: DEFAULT_FEEDBACK_BUFFER_SIZE,
        }
    }
}

impl FeedbackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_buffer_size == 0 {
            return Err(invalid("max_buffer_size", "must be at least 1"));
        }
        if self.min_feedback_for_update == 0 {
            return Err(invalid("min_feedback_for_update", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// DETECTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub classification_threshold: f64,
    /// Severity band cutoff: > t is high, > t/2 is medium
    pub severity_threshold: f64,
    pub use_continual_learning: bool,
    /// Cap on classifier (misclassification) feedback routed from detections
    pub feedback_buffer_size: usize,
    pub max_detection_history: usize,
    pub default_sequence_length: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            classification_threshold: DEFAULT_CLASSIFICATION_THRESHOLD,
            severity_threshold: DEFAULT_SEVERITY_THRESHOLD,
            use_continual_learning: true,
            feedback_buffer_size: DEFAULT_FEEDBACK_BUFFER_SIZE,
            max_detection_history: MAX_DETECTION_HISTORY,
            default_sequence_length: DEFAULT_SEQUENCE_LENGTH,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.severity_threshold.is_finite() || self.severity_threshold < 0.0 {
            return Err(invalid("severity_threshold", "must be a non-negative number"));
        }
        if self.feedback_buffer_size == 0 {
            return Err(invalid("feedback_buffer_size", "must be at least 1"));
        }
        if self.max_detection_history == 0 {
            return Err(invalid("max_detection_history", "must be at least 1"));
        }
        if self.default_sequence_length == 0 {
            return Err(invalid("default_sequence_length", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// ENGINE (bundle)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub learning: LearningConfig,
    pub feedback: FeedbackConfig,
    pub detection: DetectionConfig,
}

impl EngineConfig {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path)?;
        let config: EngineConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        log::info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.learning.validate()?;
        self.feedback.validate()?;
        self.detection.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learning.min_samples_for_update, 100);
        assert_eq!(config.feedback.min_feedback_for_update, 10);
        assert_eq!(config.detection.max_detection_history, 1000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "learning": { "epochs": 3 }, "detection": { "severity_threshold": 0.9 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.learning.epochs, 3);
        assert_eq!(config.learning.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.detection.severity_threshold, 0.9);
        assert_eq!(config.feedback, FeedbackConfig::default());
    }

    #[test]
    fn test_reject_history_without_room() {
        let config = LearningConfig {
            max_history_models: 1,
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "max_history_models"),
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{ "feedback": { "max_buffer_size": 50 } }"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.feedback.max_buffer_size, 50);
    }
}
