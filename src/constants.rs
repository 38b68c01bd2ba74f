//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.

use std::path::PathBuf;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name (used for the data directory)
pub const APP_NAME: &str = "sentinel-learn";

// ============================================
// Continual learning defaults
// ============================================

/// Hours between model updates
pub const DEFAULT_UPDATE_FREQUENCY_HOURS: f64 = 24.0;

/// Minimum buffered samples before an update is eligible
pub const DEFAULT_MIN_SAMPLES_FOR_UPDATE: usize = 100;

/// Version history capacity (base version included)
pub const DEFAULT_MAX_HISTORY_MODELS: usize = 5;

/// Maximum tolerated relative loss degradation
pub const DEFAULT_PERFORMANCE_THRESHOLD: f64 = 0.05;

/// Learning rate for incremental updates (lower than initial training)
pub const DEFAULT_CONTINUAL_LEARNING_RATE: f64 = 0.0005;

pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_EPOCHS: usize = 10;

/// Sample buffer capacity
pub const DEFAULT_SAMPLE_BUFFER_SIZE: usize = 10_000;

// ============================================
// Feedback defaults
// ============================================

pub const DEFAULT_MIN_FEEDBACK_FOR_UPDATE: usize = 10;
pub const DEFAULT_FEEDBACK_BUFFER_SIZE: usize = 1000;

// ============================================
// Detection defaults
// ============================================

pub const DEFAULT_CLASSIFICATION_THRESHOLD: f64 = 0.7;
pub const DEFAULT_SEVERITY_THRESHOLD: f64 = 0.5;

/// Detection history cap (FIFO)
pub const MAX_DETECTION_HISTORY: usize = 1000;

pub const DEFAULT_SEQUENCE_LENGTH: usize = 10;

/// Audit trail cap (in memory)
pub const MAX_AUDIT_ENTRIES: usize = 1000;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// State directory from environment or the platform data dir
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("SENTINEL_STATE_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("state")
}
