//! Sentinel Learn - Continual Learning & Detection Core
//!
//! Chấm điểm telemetry events qua anomaly model, gom feedback từ operator
//! và cập nhật model theo chu kỳ có kiểm soát (gated retrain + rollback).

pub mod constants;
pub mod logic;

pub use logic::detection::{DetectionOrchestrator, DetectionRecord, DetectionResult, SequenceResult};
pub use logic::error::EngineError;
pub use logic::learning::{ContinualLearningManager, FeedbackAggregator, UpdateOutcome};
pub use logic::model::TrainableModel;
