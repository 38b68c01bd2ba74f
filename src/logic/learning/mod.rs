//! Learning Module - Continual Learning Engine
//!
//! Các thành phần:
//! - `buffer`: samples chờ update
//! - `feedback`: feedback operator → labeled samples
//! - `history`: version ledger (base pinned, bounded)
//! - `manager`: gated retrain, commit/reject, rollback
//! - `audit`: mọi chuyển đổi version, kể cả update bị reject
//! - `storage`: save/load metadata + active snapshot

pub mod audit;
pub mod buffer;
pub mod feedback;
pub mod history;
pub mod manager;
pub mod storage;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export common types
pub use audit::{AuditAction, AuditEntry, AuditTrail};
pub use buffer::SampleBuffer;
pub use feedback::{FeedbackAggregator, FeedbackBuffers};
pub use history::VersionHistory;
pub use manager::{performance_change, ActiveModel, ContinualLearningManager};
pub use storage::{load_feedback, load_state, load_state_with_clock, save_feedback, save_state, StorageError};
pub use types::*;
