//! Detection Orchestrator - Event → score → detection record
//!
//! Flow:
//! 1. Preprocess event (hoặc chuỗi events)
//! 2. Chấm điểm bằng active model lấy từ ContinualLearningManager
//! 3. Bất thường → classify / severity (nếu có) → ghi DetectionHistory
//! 4. Feedback của operator tra theo detection id → FeedbackAggregator

use std::collections::BTreeMap;
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ndarray::{s, Array2, ArrayView2};

use super::history::DetectionHistory;
use super::types::{
    ClassificationInfo, DetectionRecord, DetectionResult, DetectionStats, SequenceResult, SeverityInfo,
    SeverityLevel,
};
use crate::logic::config::DetectionConfig;
use crate::logic::error::{EngineError, EngineResult};
use crate::logic::features::{Preprocessor, TelemetryEvent};
use crate::logic::learning::{ContinualLearningManager, FeedbackAggregator, Predicted};
use crate::logic::model::{ModelError, SeverityEstimator, ThreatClassifier};

const UNKNOWN: &str = "unknown";

fn confidence(score: f32, threshold: f32) -> f32 {
    if threshold > 0.0 {
        score / threshold
    } else {
        0.0
    }
}

/// Index of the highest score; the earliest index wins ties and NaN never wins
fn argmax_first(scores: &[f32]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some(b) if *score <= scores[b] => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Every contiguous window of `len` rows, flattened into one row each
pub fn sliding_windows(x: ArrayView2<'_, f32>, len: usize) -> Result<Array2<f32>, ModelError> {
    if len == 0 || x.nrows() < len {
        return Err(ModelError::Other(format!("{} rows cannot fill a window of {}", x.nrows(), len)));
    }
    let count = x.nrows() + 1 - len;
    let width = len * x.ncols();

    let mut data = Vec::with_capacity(count * width);
    for start in 0..count {
        data.extend(x.slice(s![start..start + len, ..]).iter().copied());
    }
    Array2::from_shape_vec((count, width), data).map_err(|e| ModelError::Other(e.to_string()))
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct DetectionOrchestrator {
    config: DetectionConfig,
    preprocessor: Arc<dyn Preprocessor>,
    anomaly: Arc<ContinualLearningManager>,
    sequence: Option<Arc<ContinualLearningManager>>,
    classifier: Option<Arc<dyn ThreatClassifier>>,
    severity: Option<Arc<dyn SeverityEstimator>>,
    feedback: Option<Arc<FeedbackAggregator>>,
    history: DetectionHistory,
    detection_count: AtomicU64,
    false_positive_count: AtomicU64,
}

impl std::fmt::Debug for DetectionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionOrchestrator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl DetectionOrchestrator {
    pub fn new(
        config: DetectionConfig,
        preprocessor: Arc<dyn Preprocessor>,
        anomaly: Arc<ContinualLearningManager>,
    ) -> Self {
        Self {
            history: DetectionHistory::new(config.max_detection_history),
            config,
            preprocessor,
            anomaly,
            sequence: None,
            classifier: None,
            severity: None,
            feedback: None,
            detection_count: AtomicU64::new(0),
            false_positive_count: AtomicU64::new(0),
        }
    }

    pub fn with_sequence_model(mut self, manager: Arc<ContinualLearningManager>) -> Self {
        self.sequence = Some(manager);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ThreatClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_severity_estimator(mut self, severity: Arc<dyn SeverityEstimator>) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_feedback(mut self, feedback: Arc<FeedbackAggregator>) -> Self {
        self.feedback = Some(feedback);
        self
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    pub fn process_event(&self, event: &TelemetryEvent, event_type: &str) -> EngineResult<DetectionResult> {
        let x = self
            .preprocessor
            .transform(slice::from_ref(event), event_type)?
            .filter(|x| x.nrows() > 0)
            .ok_or(EngineError::FeatureExtractionFailed)?;

        // One pointer read: score and threshold come from the same model
        let active = self.anomaly.active().ok_or(EngineError::NoBaseModel)?;
        let prediction = active.model.predict(x.view())?;
        let (score, flagged) = match (prediction.scores.first(), prediction.flags.first()) {
            (Some(score), Some(flag)) => (*score, *flag),
            _ => return Err(ModelError::Other("model returned no prediction".to_string()).into()),
        };
        let threshold = active.model.threshold();

        let mut result = DetectionResult {
            event_id: String::new(),
            timestamp: event.timestamp,
            event_type: event_type.to_string(),
            anomaly_score: score,
            is_anomaly: flagged,
            confidence: confidence(score, threshold),
            model_version: active.version,
            classification: None,
            severity: None,
        };

        if !flagged {
            let count = self.detection_count.load(Ordering::SeqCst);
            result.event_id = event.id.clone().unwrap_or_else(|| count.to_string());
            return Ok(result);
        }

        // Optional collaborators: a failure leaves the detection unclassified
        if let Some(classifier) = &self.classifier {
            match self.classify(classifier.as_ref(), x.view()) {
                Ok(info) => result.classification = Some(info),
                Err(e) => log::warn!("Classifier failed, recording detection without class: {}", e),
            }
        }
        if let Some(estimator) = &self.severity {
            match self.estimate_severity(estimator.as_ref(), x.view()) {
                Ok(info) => result.severity = Some(info),
                Err(e) => log::warn!("Severity estimator failed, recording detection without severity: {}", e),
            }
        }

        // Anomalies bump the counter; its value is the fallback id
        let count = self.detection_count.fetch_add(1, Ordering::SeqCst) + 1;
        result.event_id = event.id.clone().unwrap_or_else(|| count.to_string());

        self.history.push(DetectionRecord {
            id: result.event_id.clone(),
            timestamp: result.timestamp,
            event_type: result.event_type.clone(),
            anomaly_score: score,
            is_sequence: false,
            classification: Some(
                result
                    .classification
                    .as_ref()
                    .map_or_else(|| UNKNOWN.to_string(), |c| c.class_name.clone()),
            ),
            severity: Some(
                result
                    .severity
                    .as_ref()
                    .map_or_else(|| UNKNOWN.to_string(), |s| s.level.to_string()),
            ),
            features: Some(x.row(0).to_vec()),
            sequence_length: None,
            timestamp_end: None,
        });

        log::info!(
            "Anomaly detected: {} ({}) score={:.4} confidence={:.2}",
            result.event_id,
            event_type,
            score,
            result.confidence
        );
        Ok(result)
    }

    fn classify(&self, classifier: &dyn ThreatClassifier, x: ArrayView2<'_, f32>) -> EngineResult<ClassificationInfo> {
        let probs = classifier.predict_proba(x)?;
        let row: Vec<f32> = probs
            .outer_iter()
            .next()
            .map(|r| r.to_vec())
            .ok_or_else(|| ModelError::Other("classifier returned no rows".to_string()))?;
        let class_id = argmax_first(&row).ok_or_else(|| ModelError::Other("classifier returned no classes".to_string()))?;
        let names = classifier.class_names();

        let class_name = names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));
        let all_probabilities: BTreeMap<String, f32> = names.iter().cloned().zip(row.iter().copied()).collect();

        if (row[class_id] as f64) < self.config.classification_threshold {
            log::debug!(
                "Low confidence classification {} ({:.2} < {:.2})",
                class_name,
                row[class_id],
                self.config.classification_threshold
            );
        }

        Ok(ClassificationInfo {
            class_id,
            class_name,
            confidence: row[class_id],
            all_probabilities,
        })
    }

    fn estimate_severity(&self, estimator: &dyn SeverityEstimator, x: ArrayView2<'_, f32>) -> EngineResult<SeverityInfo> {
        let score = estimator
            .predict(x)?
            .first()
            .copied()
            .ok_or_else(|| ModelError::Other("severity estimator returned no score".to_string()))?;
        Ok(SeverityInfo {
            score,
            level: SeverityLevel::from_score(score, self.config.severity_threshold),
        })
    }

    // ------------------------------------------------------------------------
    // Sequences
    // ------------------------------------------------------------------------

    /// Score every sliding window and report the most anomalous one
    pub fn process_sequence(
        &self,
        events: &[TelemetryEvent],
        event_type: &str,
        sequence_length: usize,
    ) -> EngineResult<SequenceResult> {
        let sequence_length = sequence_length.max(1);
        if events.len() < sequence_length {
            return Err(EngineError::InsufficientEvents {
                needed: sequence_length,
                got: events.len(),
            });
        }

        let manager = self.sequence.as_ref().ok_or(EngineError::NotConfigured("sequence model"))?;

        let x = self
            .preprocessor
            .transform(events, event_type)?
            .filter(|x| x.nrows() == events.len())
            .ok_or(EngineError::FeatureExtractionFailed)?;
        let windows = sliding_windows(x.view(), sequence_length)?;

        let active = manager.active().ok_or(EngineError::NoBaseModel)?;
        let prediction = active.model.predict(windows.view())?;
        let best = argmax_first(&prediction.scores)
            .ok_or_else(|| ModelError::Other("sequence model returned no finite score".to_string()))?;

        let score = prediction.scores[best];
        let flagged = prediction.flags.get(best).copied().unwrap_or(false);
        let end = best + sequence_length - 1;

        let mut result = SequenceResult {
            sequence_id: self.detection_count.load(Ordering::SeqCst).to_string(),
            timestamp_start: events[best].timestamp,
            timestamp_end: events[end].timestamp,
            event_type: event_type.to_string(),
            sequence_length,
            anomaly_score: score,
            is_anomaly: flagged,
            confidence: confidence(score, active.model.threshold()),
            model_version: active.version,
            anomalous_event_indices: (best..=end).collect(),
            windows_evaluated: windows.nrows(),
        };

        if flagged {
            let count = self.detection_count.fetch_add(1, Ordering::SeqCst) + 1;
            result.sequence_id = count.to_string();

            self.history.push(DetectionRecord {
                id: result.sequence_id.clone(),
                timestamp: result.timestamp_start,
                event_type: result.event_type.clone(),
                anomaly_score: score,
                is_sequence: true,
                classification: None,
                severity: None,
                features: None,
                sequence_length: Some(sequence_length),
                timestamp_end: Some(result.timestamp_end),
            });

            log::info!(
                "Anomalous sequence detected: {} ({} events from index {}) score={:.4}",
                result.sequence_id,
                sequence_length,
                best,
                score
            );
        }

        Ok(result)
    }

    // ------------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------------

    fn feedback(&self) -> EngineResult<&FeedbackAggregator> {
        if !self.config.use_continual_learning {
            return Err(EngineError::NotConfigured("continual learning"));
        }
        self.feedback
            .as_deref()
            .ok_or(EngineError::NotConfigured("feedback aggregator"))
    }

    /// Operator verdict on a past detection
    pub fn record_feedback(
        &self,
        detection_id: &str,
        is_false_positive: bool,
        actual_class: Option<&str>,
    ) -> EngineResult<()> {
        let feedback = self.feedback()?;
        let record = self
            .history
            .find(detection_id)
            .ok_or_else(|| EngineError::DetectionNotFound(detection_id.to_string()))?;

        if is_false_positive {
            let features = record
                .features
                .ok_or_else(|| EngineError::FeaturesUnavailable(detection_id.to_string()))?;
            feedback.add_false_positive(features, Some(record.timestamp));
            self.false_positive_count.fetch_add(1, Ordering::SeqCst);
            log::info!("False positive feedback recorded for {}", detection_id);
            Ok(())
        } else if let Some(actual) = actual_class {
            let predicted = record
                .classification
                .ok_or_else(|| EngineError::SequenceFeedbackUnsupported(detection_id.to_string()))?;
            let features = record
                .features
                .ok_or_else(|| EngineError::FeaturesUnavailable(detection_id.to_string()))?;
            feedback.add_misclassification_capped(
                features,
                Some(Predicted::Class(predicted)),
                Some(actual.to_string()),
                Some(record.timestamp),
                self.config.feedback_buffer_size,
            );
            log::info!("Misclassification feedback recorded for {}", detection_id);
            Ok(())
        } else {
            Err(EngineError::InvalidFeedbackParameters)
        }
    }

    /// Operator report of a threat the model scored as normal
    pub fn record_missed_detection(&self, event: &TelemetryEvent, event_type: &str) -> EngineResult<()> {
        let feedback = self.feedback()?;
        let x = self
            .preprocessor
            .transform(slice::from_ref(event), event_type)?
            .filter(|x| x.nrows() > 0)
            .ok_or(EngineError::FeatureExtractionFailed)?;

        feedback.add_false_negative(x.row(0).to_vec(), Some(event.timestamp));
        log::info!("False negative feedback recorded ({})", event_type);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn detection_count(&self) -> u64 {
        self.detection_count.load(Ordering::SeqCst)
    }

    pub fn false_positive_count(&self) -> u64 {
        self.false_positive_count.load(Ordering::SeqCst)
    }

    pub fn recent_detections(&self, limit: usize) -> Vec<DetectionRecord> {
        self.history.recent(limit)
    }

    pub fn stats(&self) -> DetectionStats {
        DetectionStats {
            detection_count: self.detection_count(),
            false_positive_count: self.false_positive_count(),
            history_len: self.history.len(),
            anomaly_model_version: self.anomaly.active_version(),
            sequence_model_version: self.sequence.as_ref().and_then(|m| m.active_version()),
            feedback: self.feedback.as_ref().map(|f| f.counts()),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }
}
