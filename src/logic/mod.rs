//! Logic Module - Business Logic & Engines
//!
//! Chứa các engines xử lý: feature preprocessing, models, continual learning,
//! detection orchestration.
//!
//! ## Architecture
//! - `features/` - Telemetry event → feature matrix (theo layout)
//! - `model/` - Trainable models, threshold, snapshot envelope
//! - `learning/` - Sample buffer, version history, feedback, persistence
//! - `detection/` - Event/sequence scoring và feedback routing

pub mod clock;
pub mod config;
pub mod detection;
pub mod error;
pub mod features;
pub mod learning;
pub mod model;

#[cfg(test)]
pub(crate) mod test_support;
