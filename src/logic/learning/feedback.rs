//! Feedback Aggregator - Hàng đợi feedback từ operator
//!
//! Flow:
//! 1. Operator đánh dấu false positive / false negative / sai class
//! 2. Feedback vào bounded FIFO theo category (đầy → evict cũ nhất)
//! 3. `process()`: đủ ngưỡng → relabel (FP = 0, FN = 1), đẩy vào sample
//!    buffer của manager, và chạy update nếu đủ điều kiện
//!
//! Misclassification được giữ riêng cho classifier, không vào sample buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::audit::{AuditAction, AuditEntry};
use super::manager::ContinualLearningManager;
use super::types::{FeedbackCategory, FeedbackCounts, FeedbackItem, FeedbackOutcome, Predicted, Sample};
use crate::logic::clock::{epoch_seconds, Clock, SystemClock};
use crate::logic::config::FeedbackConfig;
use crate::logic::error::{EngineError, EngineResult};

const FALSE_POSITIVE_LABEL: i32 = 0;
const FALSE_NEGATIVE_LABEL: i32 = 1;

// ============================================================================
// BUFFERS
// ============================================================================

/// FIFO contents, also the persisted form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackBuffers {
    pub false_positives: VecDeque<FeedbackItem>,
    pub false_negatives: VecDeque<FeedbackItem>,
    pub misclassifications: VecDeque<FeedbackItem>,
}

impl FeedbackBuffers {
    fn queue_mut(&mut self, category: FeedbackCategory) -> &mut VecDeque<FeedbackItem> {
        match category {
            FeedbackCategory::FalsePositive => &mut self.false_positives,
            FeedbackCategory::FalseNegative => &mut self.false_negatives,
            FeedbackCategory::Misclassification => &mut self.misclassifications,
        }
    }

    fn counts(&self) -> FeedbackCounts {
        FeedbackCounts {
            false_positives: self.false_positives.len(),
            false_negatives: self.false_negatives.len(),
            misclassifications: self.misclassifications.len(),
        }
    }
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct FeedbackAggregator {
    config: FeedbackConfig,
    clock: Arc<dyn Clock>,
    buffers: Mutex<FeedbackBuffers>,
    manager: RwLock<Option<Arc<ContinualLearningManager>>>,
}

impl std::fmt::Debug for FeedbackAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackAggregator")
            .field("counts", &self.counts())
            .field("has_manager", &self.manager.read().is_some())
            .finish()
    }
}

impl FeedbackAggregator {
    pub fn new(config: FeedbackConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: FeedbackConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buffers: Mutex::new(FeedbackBuffers::default()),
            manager: RwLock::new(None),
        }
    }

    pub fn set_manager(&self, manager: Arc<ContinualLearningManager>) {
        *self.manager.write() = Some(manager);
        log::info!("Feedback aggregator connected to continual learning manager");
    }

    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Add
    // ------------------------------------------------------------------------

    pub fn add_false_positive(&self, features: Vec<f32>, timestamp: Option<f64>) {
        let item = FeedbackItem::new(FeedbackCategory::FalsePositive, features, self.stamp(timestamp));
        self.push(item);
    }

    pub fn add_false_negative(&self, features: Vec<f32>, timestamp: Option<f64>) {
        let item = FeedbackItem::new(FeedbackCategory::FalseNegative, features, self.stamp(timestamp));
        self.push(item);
    }

    pub fn add_misclassification(
        &self,
        features: Vec<f32>,
        predicted: Option<Predicted>,
        actual: Option<String>,
        timestamp: Option<f64>,
    ) {
        self.add_misclassification_capped(features, predicted, actual, timestamp, self.config.max_buffer_size);
    }

    /// Misclassification queue held to `cap` entries (never above `max_buffer_size`)
    pub fn add_misclassification_capped(
        &self,
        features: Vec<f32>,
        predicted: Option<Predicted>,
        actual: Option<String>,
        timestamp: Option<f64>,
        cap: usize,
    ) {
        let mut item = FeedbackItem::new(FeedbackCategory::Misclassification, features, self.stamp(timestamp));
        item.predicted = predicted;
        item.actual = actual;
        self.push_bounded(item, cap.min(self.config.max_buffer_size));
    }

    fn stamp(&self, timestamp: Option<f64>) -> f64 {
        timestamp.unwrap_or_else(|| epoch_seconds(self.clock.now()))
    }

    fn push(&self, item: FeedbackItem) {
        self.push_bounded(item, self.config.max_buffer_size);
    }

    fn push_bounded(&self, item: FeedbackItem, cap: usize) {
        let category = item.category;
        let mut buffers = self.buffers.lock();
        let queue = buffers.queue_mut(category);

        while queue.len() >= cap.max(1) && queue.pop_front().is_some() {
            log::debug!("Feedback buffer ({}) full, evicted oldest entry", category);
        }
        queue.push_back(item);
        log::trace!("Added {} feedback (queue size: {})", category, queue.len());
    }

    // ------------------------------------------------------------------------
    // Process
    // ------------------------------------------------------------------------

    /// Move FP/FN feedback into the manager once either count reaches the threshold
    pub fn process(&self) -> EngineResult<FeedbackOutcome> {
        let min = self.config.min_feedback_for_update;

        let (manager, false_positives, false_negatives) = {
            let mut buffers = self.buffers.lock();
            if buffers.false_positives.len() < min && buffers.false_negatives.len() < min {
                return Ok(FeedbackOutcome::NoAction);
            }

            let manager = self
                .manager
                .read()
                .clone()
                .ok_or(EngineError::NotConfigured("continual learning manager"))?;

            let fp = std::mem::take(&mut buffers.false_positives);
            let fn_ = std::mem::take(&mut buffers.false_negatives);
            (manager, fp, fn_)
        };

        let (fp_count, fn_count) = (false_positives.len(), false_negatives.len());
        let samples = false_positives
            .into_iter()
            .map(|item| Sample::new(item.features, Some(FALSE_POSITIVE_LABEL), item.timestamp))
            .chain(
                false_negatives
                    .into_iter()
                    .map(|item| Sample::new(item.features, Some(FALSE_NEGATIVE_LABEL), item.timestamp)),
            );
        manager.add_samples(samples);

        manager.audit().log(
            AuditEntry::new(AuditAction::FeedbackProcessed, self.clock.now())
                .with_details(&format!("{} false positives, {} false negatives", fp_count, fn_count)),
        );
        log::info!(
            "Processed feedback: {} false positives, {} false negatives",
            fp_count,
            fn_count
        );

        if manager.should_update() {
            Ok(FeedbackOutcome::Update(manager.update(None)?))
        } else {
            Ok(FeedbackOutcome::Buffered)
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn counts(&self) -> FeedbackCounts {
        self.buffers.lock().counts()
    }

    /// Hand misclassification feedback to classifier refinement
    pub fn drain_misclassifications(&self) -> Vec<FeedbackItem> {
        self.buffers.lock().misclassifications.drain(..).collect()
    }

    /// Copy of all FIFO contents
    pub fn snapshot(&self) -> FeedbackBuffers {
        self.buffers.lock().clone()
    }

    /// Replace FIFO contents, trimming each queue to capacity (oldest dropped)
    pub fn restore(&self, mut buffers: FeedbackBuffers) {
        let cap = self.config.max_buffer_size;
        for queue in [
            &mut buffers.false_positives,
            &mut buffers.false_negatives,
            &mut buffers.misclassifications,
        ] {
            while queue.len() > cap {
                queue.pop_front();
            }
        }
        *self.buffers.lock() = buffers;
    }
}
