//! Detection Module - Live event/sequence scoring
//!
//! Events đi qua preprocessor → active model (qua ContinualLearningManager).
//! Detections bất thường được giữ lại để correlate feedback về sau.

pub mod history;
pub mod orchestrator;
pub mod types;


pub use history::DetectionHistory;
pub use orchestrator::{sliding_windows, DetectionOrchestrator};
pub use types::{
    ClassificationInfo, DetectionRecord, DetectionResult, DetectionStats, SequenceResult, SeverityInfo,
    SeverityLevel,
};
