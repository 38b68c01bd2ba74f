//! Features Module - Event Preprocessing
//!
//! Chuyển raw telemetry events thành feature matrix cho anomaly model.
//! Layout cột cố định theo từng event type (xem `layout`).

pub mod event;
pub mod layout;
pub mod preprocessor;


use ndarray::Array2;
use thiserror::Error;

// Re-export common types
pub use event::{EventType, TelemetryEvent};
pub use layout::{layout_hash, ColumnLayout, LayoutInfo, FEATURE_VERSION};
pub use preprocessor::{EventPreprocessor, StandardScaler};

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

/// Raw events → feature matrix (one row per event)
pub trait Preprocessor: Send + Sync {
    /// `Ok(None)` when there is nothing to transform
    fn transform(&self, events: &[TelemetryEvent], event_type: &str) -> Result<Option<Array2<f32>>, PreprocessError>;
}
