//! Learning State Storage
//!
//! Layout trong state dir:
//! - `metadata.json`: config, last_update_time, metrics, model_history
//! - `buffer_stats.json`: thống kê sample buffer (chỉ để quan sát)
//! - `current_model.bin`: snapshot của active model (checksummed)
//! - `feedback_processor.json`: config + FIFO contents của aggregator
//!
//! Load chỉ dựng lại snapshot của active model; các version cũ chỉ còn metadata.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::feedback::{FeedbackAggregator, FeedbackBuffers};
use super::manager::{ActiveModel, ContinualLearningManager};
use super::types::{BufferStats, ModelVersion, UpdateMetrics, VersionInfo};
use crate::logic::clock::{Clock, SystemClock};
use crate::logic::config::{ConfigError, FeedbackConfig, LearningConfig};
use crate::logic::model::{ModelError, ModelHandle, SnapshotEnvelope, TrainableModel};

pub const METADATA_FILE: &str = "metadata.json";
pub const BUFFER_STATS_FILE: &str = "buffer_stats.json";
pub const MODEL_FILE: &str = "current_model.bin";
pub const FEEDBACK_FILE: &str = "feedback_processor.json";

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state: {0}")]
    Corrupt(String),

    #[error("model snapshot missing: {0}")]
    MissingModel(PathBuf),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error("invalid persisted config: {0}")]
    Config(#[from] ConfigError),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Corrupt(e.to_string())
    }
}

// ============================================================================
// PERSISTED TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMetadata {
    pub config: LearningConfig,
    /// ISO-8601
    pub last_update_time: Option<DateTime<Utc>>,
    pub performance_metrics: Vec<UpdateMetrics>,
    pub model_history: Vec<VersionInfo>,
    pub active_version: Option<u32>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackState {
    pub config: FeedbackConfig,
    pub buffers: FeedbackBuffers,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StorageError> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

// ============================================================================
// MANAGER STATE
// ============================================================================

/// Save manager metadata, buffer stats and the active model snapshot
pub fn save_state(manager: &ContinualLearningManager, dir: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(dir)?;

    let active = manager.active();
    let metadata = StateMetadata {
        config: manager.config().clone(),
        last_update_time: manager.last_update_time(),
        performance_metrics: manager.performance_metrics(),
        model_history: manager.versions(),
        active_version: active.as_ref().map(|a| a.version),
        saved_at: manager.clock().now(),
    };
    write_json(&dir.join(METADATA_FILE), &metadata)?;
    write_json(&dir.join(BUFFER_STATS_FILE), &manager.buffer_stats())?;

    let model_path = dir.join(MODEL_FILE);
    match active {
        Some(active) => {
            let envelope = SnapshotEnvelope::seal(active.model.as_ref())?;
            write_json(&model_path, &envelope)?;
        }
        None => {
            if model_path.exists() {
                fs::remove_file(&model_path)?;
            }
        }
    }

    log::info!(
        "Saved learning state to {} ({} versions)",
        dir.display(),
        metadata.model_history.len()
    );
    Ok(())
}

pub fn load_state<F>(dir: &Path, loader: F) -> Result<ContinualLearningManager, StorageError>
where
    F: Fn(&[u8]) -> Result<Box<dyn TrainableModel>, ModelError>,
{
    load_state_with_clock(dir, Arc::new(SystemClock), loader)
}

/// Rebuild a manager. `loader` turns the snapshot payload back into a model.
pub fn load_state_with_clock<F>(
    dir: &Path,
    clock: Arc<dyn Clock>,
    loader: F,
) -> Result<ContinualLearningManager, StorageError>
where
    F: Fn(&[u8]) -> Result<Box<dyn TrainableModel>, ModelError>,
{
    let metadata: StateMetadata = read_json(&dir.join(METADATA_FILE))?;
    metadata.config.validate()?;

    let active = match metadata.active_version {
        Some(version) => {
            let model_path = dir.join(MODEL_FILE);
            if !model_path.exists() {
                return Err(StorageError::MissingModel(model_path));
            }
            let envelope: SnapshotEnvelope = read_json(&model_path)?;
            let payload = envelope.open().map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let model: ModelHandle = Arc::from(loader(payload)?);
            Some(ActiveModel { version, model })
        }
        None => None,
    };

    if let Some(active) = &active {
        if !metadata.model_history.iter().any(|v| v.version == active.version) {
            return Err(StorageError::Corrupt(format!(
                "active version {} missing from model history",
                active.version
            )));
        }
    }

    let entries: Vec<ModelVersion> = metadata
        .model_history
        .iter()
        .map(|info| ModelVersion {
            version: info.version,
            snapshot: active
                .as_ref()
                .filter(|a| a.version == info.version)
                .map(|a| a.model.clone()),
            created_at: info.timestamp,
            metrics: info.metrics.clone(),
            parent_version: info.parent_version,
            rollback_source: info.rollback_from,
        })
        .collect();

    log::info!(
        "Loaded learning state from {} ({} versions, active {:?})",
        dir.display(),
        entries.len(),
        metadata.active_version
    );

    Ok(ContinualLearningManager::restore(
        metadata.config,
        clock,
        entries,
        active,
        metadata.last_update_time,
        metadata.performance_metrics,
    )?)
}

pub fn load_buffer_stats(dir: &Path) -> Result<BufferStats, StorageError> {
    read_json(&dir.join(BUFFER_STATS_FILE))
}

// ============================================================================
// FEEDBACK STATE
// ============================================================================

pub fn save_feedback(aggregator: &FeedbackAggregator, dir: &Path) -> Result<(), StorageError> {
    fs::create_dir_all(dir)?;
    let state = FeedbackState {
        config: aggregator.config().clone(),
        buffers: aggregator.snapshot(),
    };
    write_json(&dir.join(FEEDBACK_FILE), &state)
}

/// Rebuild an aggregator (no manager attached; call `set_manager`)
pub fn load_feedback(dir: &Path) -> Result<FeedbackAggregator, StorageError> {
    let state: FeedbackState = read_json(&dir.join(FEEDBACK_FILE))?;
    let aggregator = FeedbackAggregator::new(state.config);
    aggregator.restore(state.buffers);
    Ok(aggregator)
}
