//! Engine Errors
//!
//! Lỗi do caller (version sai, detection id không tồn tại...) được trả về
//! dạng typed error. Update cycle thất bại KHÔNG nằm ở đây: đó là
//! `UpdateOutcome::Rejected` (training failure = `RejectionReason::TrainingFailed`).

use thiserror::Error;

use super::features::PreprocessError;
use super::model::ModelError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Required collaborator not set
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("no base model has been set")]
    NoBaseModel,

    #[error("base model is already set")]
    BaseModelAlreadySet,

    #[error("model version {0} not found")]
    VersionNotFound(u32),

    /// Version metadata exists but its snapshot was not restored
    #[error("snapshot for model version {0} is not available")]
    SnapshotUnavailable(u32),

    #[error("failed to extract features from event")]
    FeatureExtractionFailed,

    #[error("sequence too short: need at least {needed} events, got {got}")]
    InsufficientEvents { needed: usize, got: usize },

    #[error("detection {0} not found in history")]
    DetectionNotFound(String),

    #[error("cannot provide class feedback for sequence detection {0}")]
    SequenceFeedbackUnsupported(String),

    #[error("invalid feedback parameters")]
    InvalidFeedbackParameters,

    #[error("no features stored for detection {0}")]
    FeaturesUnavailable(String),

    #[error("another model update is in progress")]
    UpdateInProgress,

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("preprocessing error: {0}")]
    Preprocessing(#[from] PreprocessError),
}
