//! Continual Learning Manager - Gated retrain & rollback
//!
//! Quản lý active model, sample buffer và version history.
//!
//! Update cycle:
//! 1. Chưa đủ điều kiện (thời gian + số samples) → Skipped
//! 2. Drain buffer, clone active model, fit với learning rate thấp hơn
//! 3. Có validation data → so sánh loss cũ/mới, giảm quá threshold → Rejected
//! 4. Commit: swap active model (atomic), ghi version mới
//!
//! Tối đa một update chạy tại một thời điểm.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView2};
use parking_lot::{Mutex, RwLock};

use super::audit::{AuditAction, AuditEntry, AuditTrail};
use super::buffer::SampleBuffer;
use super::history::VersionHistory;
use super::types::{
    BufferStats, ModelVersion, Rejection, RejectionReason, Sample, TrendPoint, UpdateMetrics, UpdateOutcome,
    VersionInfo,
};
use crate::logic::clock::{epoch_seconds, Clock, SystemClock};
use crate::logic::config::{ConfigError, LearningConfig};
use crate::logic::error::{EngineError, EngineResult};
use crate::logic::model::{FitParams, ModelHandle, Prediction, TrainableModel, TrainingTarget, ValidationSet};

// ============================================================================
// ACTIVE MODEL
// ============================================================================

/// Active model + its version, swapped together as one pointer
#[derive(Debug, Clone)]
pub struct ActiveModel {
    pub version: u32,
    pub model: ModelHandle,
}

/// Relative loss improvement; positive = better
pub fn performance_change(old_loss: f64, new_loss: f64) -> f64 {
    if old_loss == 0.0 {
        if new_loss == 0.0 {
            0.0
        } else {
            -1.0
        }
    } else {
        (old_loss - new_loss) / old_loss
    }
}

/// Drained samples as a training matrix
struct TrainingBatch {
    x: Array2<f32>,
    target: TrainingTarget,
}

impl TrainingBatch {
    fn from_samples(samples: &[Sample], input_dim: usize) -> Result<Self, String> {
        if samples.is_empty() {
            return Err("no samples to train on".to_string());
        }
        if let Some(bad) = samples.iter().find(|s| s.features.len() != input_dim) {
            return Err(format!(
                "sample has {} features, model expects {}",
                bad.features.len(),
                input_dim
            ));
        }

        let data: Vec<f32> = samples.iter().flat_map(|s| s.features.iter().copied()).collect();
        let x = Array2::from_shape_vec((samples.len(), input_dim), data).map_err(|e| e.to_string())?;

        // Supervised only when every sample carries a label
        let target = if samples.iter().all(|s| s.label.is_some()) {
            TrainingTarget::Labels(samples.iter().map(|s| s.label.unwrap_or_default() as f32).collect())
        } else {
            TrainingTarget::Reconstruction
        };

        Ok(Self { x, target })
    }
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct ContinualLearningManager {
    config: LearningConfig,
    clock: Arc<dyn Clock>,
    active: RwLock<Option<Arc<ActiveModel>>>,
    buffer: SampleBuffer,
    history: RwLock<VersionHistory>,
    last_update_time: RwLock<Option<DateTime<Utc>>>,
    performance_metrics: RwLock<Vec<UpdateMetrics>>,
    audit: AuditTrail,
    /// Held for the whole update / rollback
    update_lock: Mutex<()>,
}

impl std::fmt::Debug for ContinualLearningManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinualLearningManager")
            .field("active_version", &self.active_version())
            .field("buffered_samples", &self.buffered_samples())
            .field("history_len", &self.history_len())
            .finish()
    }
}

impl ContinualLearningManager {
    pub fn new(config: LearningConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Rejects configs the version history cannot honour (e.g. `max_history_models < 2`)
    pub fn with_clock(config: LearningConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            buffer: SampleBuffer::new(config.max_buffer_size),
            history: RwLock::new(VersionHistory::new(config.max_history_models)),
            config,
            clock,
            active: RwLock::new(None),
            last_update_time: RwLock::new(None),
            performance_metrics: RwLock::new(Vec::new()),
            audit: AuditTrail::default(),
            update_lock: Mutex::new(()),
        })
    }

    /// Rebuild from persisted bookkeeping (see `storage::load_state`)
    pub(crate) fn restore(
        config: LearningConfig,
        clock: Arc<dyn Clock>,
        entries: Vec<ModelVersion>,
        active: Option<ActiveModel>,
        last_update_time: Option<DateTime<Utc>>,
        performance_metrics: Vec<UpdateMetrics>,
    ) -> Result<Self, ConfigError> {
        let manager = Self::with_clock(config, clock)?;
        *manager.history.write() = VersionHistory::from_entries(manager.config.max_history_models, entries);
        *manager.active.write() = active.map(Arc::new);
        *manager.last_update_time.write() = last_update_time;
        *manager.performance_metrics.write() = performance_metrics;

        let mut entry = AuditEntry::new(AuditAction::StateRestored, manager.clock.now());
        if let Some(version) = manager.active_version() {
            entry = entry.with_version(version);
        }
        manager.audit.log(entry);
        Ok(manager)
    }

    // ------------------------------------------------------------------------
    // Base model
    // ------------------------------------------------------------------------

    /// Install the base model as version 1. Valid once.
    pub fn set_base_model(&self, model: Box<dyn TrainableModel>) -> EngineResult<u32> {
        let _guard = self.update_lock.lock();
        if self.active.read().is_some() {
            return Err(EngineError::BaseModelAlreadySet);
        }

        let model: ModelHandle = Arc::from(model);
        let now = self.clock.now();

        let version = {
            let mut history = self.history.write();
            let version = history.record(Some(model.clone()), now, None, None, None);
            *self.active.write() = Some(Arc::new(ActiveModel { version, model }));
            version
        };
        *self.last_update_time.write() = Some(now);

        self.audit.log(AuditEntry::new(AuditAction::BaseModelSet, now).with_version(version));
        log::info!("Base model set as version {}", version);
        Ok(version)
    }

    // ------------------------------------------------------------------------
    // Samples
    // ------------------------------------------------------------------------

    /// Buffer one sample; missing timestamp = now
    pub fn add_sample(&self, features: Vec<f32>, label: Option<i32>, timestamp: Option<f64>) {
        let timestamp = timestamp.unwrap_or_else(|| epoch_seconds(self.clock.now()));
        self.buffer.add(Sample::new(features, label, timestamp));
    }

    pub fn add_samples(&self, samples: impl IntoIterator<Item = Sample>) {
        self.buffer.extend(samples);
    }

    /// Buffer every row of `x`. Rows beyond `labels` stay unlabeled.
    pub fn add_batch(&self, x: ArrayView2<'_, f32>, labels: Option<&[i32]>, timestamp: Option<f64>) {
        let timestamp = timestamp.unwrap_or_else(|| epoch_seconds(self.clock.now()));
        let samples = x.rows().into_iter().enumerate().map(|(i, row)| {
            let label = labels.and_then(|l| l.get(i).copied());
            Sample::new(row.to_vec(), label, timestamp)
        });
        self.buffer.extend(samples);
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.size()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    // ------------------------------------------------------------------------
    // Update cycle
    // ------------------------------------------------------------------------

    /// Time elapsed AND enough samples buffered. No side effects.
    pub fn should_update(&self) -> bool {
        let time_ok = match *self.last_update_time.read() {
            Some(last) => {
                let elapsed_hours = (self.clock.now() - last).num_milliseconds() as f64 / 3_600_000.0;
                elapsed_hours >= self.config.update_frequency_hours
            }
            None => true,
        };

        time_ok && self.buffer.size() >= self.config.min_samples_for_update
    }

    /// Gated retrain. Regression and training failure come back as `Ok(Rejected)`.
    pub fn update(&self, validation: Option<&ValidationSet>) -> EngineResult<UpdateOutcome> {
        let Some(_guard) = self.update_lock.try_lock() else {
            log::warn!("Model update requested while another update is running");
            return Ok(UpdateOutcome::InProgress);
        };

        if !self.should_update() {
            log::debug!(
                "Model update skipped ({} samples buffered, need {})",
                self.buffer.size(),
                self.config.min_samples_for_update
            );
            self.audit.log(AuditEntry::new(AuditAction::UpdateSkipped, self.clock.now()));
            return Ok(UpdateOutcome::Skipped);
        }

        let active = self.active().ok_or(EngineError::NoBaseModel)?;

        // Buffer is consumed here whatever the outcome
        let samples = self.buffer.drain();
        let batch = match TrainingBatch::from_samples(&samples, active.model.input_dim()) {
            Ok(batch) => batch,
            Err(message) => return Ok(self.reject(RejectionReason::TrainingFailed { message }, None)),
        };
        log::info!(
            "Updating model v{} on {} samples ({})",
            active.version,
            samples.len(),
            if batch.target.is_supervised() { "supervised" } else { "unsupervised" }
        );

        let mut candidate = active.model.clone_model();
        candidate.set_learning_rate(self.config.learning_rate);

        let params = FitParams {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
        };
        let losses = match candidate.fit(batch.x.view(), &batch.target, params, validation) {
            Ok(losses) => losses,
            Err(e) => return Ok(self.reject(RejectionReason::TrainingFailed { message: e.to_string() }, None)),
        };

        let final_loss = match losses.final_loss() {
            Some(loss) if loss.is_finite() => loss,
            other => {
                let message = format!("training produced no finite loss ({:?})", other);
                return Ok(self.reject(RejectionReason::TrainingFailed { message }, None));
            }
        };

        let performance_change = match validation {
            Some(val) => match self.validation_change(active.model.as_ref(), candidate.as_ref(), val) {
                Ok(change) => Some(change),
                Err(message) => return Ok(self.reject(RejectionReason::TrainingFailed { message }, None)),
            },
            None => None,
        };

        let metrics = UpdateMetrics {
            final_loss,
            final_val_loss: losses.final_val_loss(),
            performance_change,
        };

        if let Some(change) = performance_change {
            if change < -self.config.performance_threshold {
                let reason = RejectionReason::PerformanceRegression { degradation: -change };
                return Ok(self.reject(reason, Some(metrics)));
            }
        }

        Ok(self.commit(&active, Arc::from(candidate), metrics))
    }

    fn validation_change(
        &self,
        old: &dyn TrainableModel,
        new: &dyn TrainableModel,
        validation: &ValidationSet,
    ) -> Result<f64, String> {
        let old_loss = old
            .evaluate(validation.features.view(), &validation.target)
            .map_err(|e| e.to_string())?;
        let new_loss = new
            .evaluate(validation.features.view(), &validation.target)
            .map_err(|e| e.to_string())?;

        if !old_loss.is_finite() || !new_loss.is_finite() {
            return Err(format!("non-finite validation loss (old {}, new {})", old_loss, new_loss));
        }
        log::debug!("Validation loss: old={:.6}, new={:.6}", old_loss, new_loss);
        Ok(performance_change(old_loss, new_loss))
    }

    fn commit(&self, previous: &ActiveModel, model: ModelHandle, metrics: UpdateMetrics) -> UpdateOutcome {
        let now = self.clock.now();

        let version = {
            let mut history = self.history.write();
            let version = history.record(Some(model.clone()), now, Some(metrics.clone()), Some(previous.version), None);
            *self.active.write() = Some(Arc::new(ActiveModel { version, model }));
            version
        };
        *self.last_update_time.write() = Some(now);
        self.performance_metrics.write().push(metrics.clone());

        self.audit.log(
            AuditEntry::new(AuditAction::UpdateCommitted, now)
                .with_version(version)
                .with_change(metrics.performance_change)
                .with_details(&format!("parent v{}", previous.version)),
        );
        log::info!(
            "Model updated to version {} (loss {:.6}, change {:?})",
            version,
            metrics.final_loss,
            metrics.performance_change
        );

        UpdateOutcome::Committed {
            version,
            metrics,
            timestamp: now,
        }
    }

    fn reject(&self, reason: RejectionReason, metrics: Option<UpdateMetrics>) -> UpdateOutcome {
        let change = metrics.as_ref().and_then(|m| m.performance_change);
        self.audit.log(
            AuditEntry::new(AuditAction::UpdateRejected, self.clock.now())
                .with_change(change)
                .with_details(&reason.to_string()),
        );
        log::warn!("Model update rejected: {}", reason);

        UpdateOutcome::Rejected(Rejection { reason, metrics })
    }

    // ------------------------------------------------------------------------
    // Rollback
    // ------------------------------------------------------------------------

    /// Reinstate `version` as a new history entry. Returns the new version number.
    pub fn rollback(&self, version: u32) -> EngineResult<u32> {
        let _guard = self.update_lock.try_lock().ok_or(EngineError::UpdateInProgress)?;
        let now = self.clock.now();

        let (new_version, previous) = {
            let mut history = self.history.write();
            let target = history.get(version)?;
            let snapshot = target.snapshot.clone().ok_or(EngineError::SnapshotUnavailable(version))?;
            let metrics = target.metrics.clone();

            let previous = self.active_version();
            let model: ModelHandle = Arc::from(snapshot.clone_model());
            let new_version = history.record(Some(model.clone()), now, metrics, previous, Some(version));
            *self.active.write() = Some(Arc::new(ActiveModel {
                version: new_version,
                model,
            }));
            (new_version, previous)
        };

        self.audit.log(
            AuditEntry::new(AuditAction::RolledBack, now)
                .with_version(new_version)
                .with_details(&format!("rollback to v{} from v{:?}", version, previous)),
        );
        log::info!("Rolled back to version {} (recorded as version {})", version, new_version);
        Ok(new_version)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Current active model pointer (cheap clone)
    pub fn active(&self) -> Option<Arc<ActiveModel>> {
        self.active.read().clone()
    }

    pub fn active_model(&self) -> EngineResult<ModelHandle> {
        self.active()
            .map(|a| a.model.clone())
            .ok_or(EngineError::NoBaseModel)
    }

    pub fn active_version(&self) -> Option<u32> {
        self.active.read().as_ref().map(|a| a.version)
    }

    pub fn current_threshold(&self) -> Option<f32> {
        self.active.read().as_ref().map(|a| a.model.threshold())
    }

    /// Score with the active model; model and threshold come from one snapshot
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> EngineResult<Prediction> {
        let model = self.active_model()?;
        Ok(model.predict(x)?)
    }

    pub fn performance_trend(&self) -> Vec<TrendPoint> {
        self.history
            .read()
            .trend()
            .into_iter()
            .filter(|p| p.version > 1)
            .collect()
    }

    pub fn get_version(&self, version: u32) -> EngineResult<ModelVersion> {
        self.history.read().get(version).cloned()
    }

    pub fn versions(&self) -> Vec<VersionInfo> {
        self.history.read().versions()
    }

    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    pub fn performance_metrics(&self) -> Vec<UpdateMetrics> {
        self.performance_metrics.read().clone()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        *self.last_update_time.read()
    }

    pub fn audit_trail(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit.recent(limit)
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
