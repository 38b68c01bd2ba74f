//! Test doubles dùng chung cho learning / detection tests

use std::sync::{Arc, Barrier};

use ndarray::{Array2, ArrayView2, Axis};
use parking_lot::Mutex;

use crate::logic::features::{PreprocessError, Preprocessor, TelemetryEvent};
use crate::logic::model::{FitParams, LossHistory, ModelError, Prediction, TrainableModel, TrainingTarget, ValidationSet};

/// Model with scripted losses. Score = row sum.
#[derive(Debug, Clone)]
pub struct ScriptedModel {
    pub input_dim: usize,
    pub weights: Vec<f32>,
    pub threshold: f32,
    pub learning_rate: f64,
    /// Loss reported by `fit`
    pub fit_loss: f64,
    pub fail_fit: bool,
    /// Loss reported by `evaluate`
    pub eval_loss: f64,
    /// `eval_loss` after a successful fit
    pub eval_loss_after_fit: f64,
    /// Every target passed to `fit`, shared across clones
    pub targets: Arc<Mutex<Vec<TrainingTarget>>>,
    /// Learning rate at every `fit`, shared across clones
    pub learning_rates: Arc<Mutex<Vec<f64>>>,
    /// When set, `fit` waits twice: once to signal it started, once to be released
    pub barrier: Option<Arc<Barrier>>,
}

impl ScriptedModel {
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            weights: vec![0.0; 4],
            threshold: 1.0,
            learning_rate: 0.01,
            fit_loss: 0.1,
            fail_fit: false,
            eval_loss: 1.0,
            eval_loss_after_fit: 0.9,
            targets: Arc::new(Mutex::new(Vec::new())),
            learning_rates: Arc::new(Mutex::new(Vec::new())),
            barrier: None,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_losses(mut self, before: f64, after: f64) -> Self {
        self.eval_loss = before;
        self.eval_loss_after_fit = after;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_fit = true;
        self
    }
}

impl TrainableModel for ScriptedModel {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Prediction, ModelError> {
        if x.ncols() != self.input_dim {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_dim,
                actual: x.ncols(),
            });
        }
        let scores: Vec<f32> = x.sum_axis(Axis(1)).to_vec();
        let flags = scores.iter().map(|s| *s > self.threshold).collect();
        Ok(Prediction { scores, flags })
    }

    fn fit(
        &mut self,
        _x: ArrayView2<'_, f32>,
        target: &TrainingTarget,
        _params: FitParams,
        validation: Option<&ValidationSet>,
    ) -> Result<LossHistory, ModelError> {
        if let Some(barrier) = &self.barrier {
            barrier.wait();
            barrier.wait();
        }
        self.targets.lock().push(target.clone());
        self.learning_rates.lock().push(self.learning_rate);

        if self.fail_fit {
            return Err(ModelError::Diverged {
                epoch: 0,
                loss: f64::NAN,
            });
        }

        for w in &mut self.weights {
            *w += 1.0;
        }
        self.eval_loss = self.eval_loss_after_fit;
        Ok(LossHistory {
            loss: vec![self.fit_loss * 2.0, self.fit_loss],
            val_loss: validation.map(|_| vec![self.eval_loss]).unwrap_or_default(),
        })
    }

    fn evaluate(&self, _x: ArrayView2<'_, f32>, _target: &TrainingTarget) -> Result<f64, ModelError> {
        Ok(self.eval_loss)
    }

    fn clone_model(&self) -> Box<dyn TrainableModel> {
        Box::new(self.clone())
    }

    fn weights(&self) -> Vec<f32> {
        self.weights.clone()
    }

    fn set_weights(&mut self, weights: &[f32]) -> Result<(), ModelError> {
        self.weights = weights.to_vec();
        Ok(())
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        Ok(serde_json::to_vec(&self.weights)?)
    }
}

/// One column per event: the numeric `value` field. `None` for empty input.
#[derive(Debug, Default)]
pub struct ValuePreprocessor;

impl Preprocessor for ValuePreprocessor {
    fn transform(&self, events: &[TelemetryEvent], event_type: &str) -> Result<Option<Array2<f32>>, PreprocessError> {
        event_type.parse::<crate::logic::features::EventType>()?;
        if events.is_empty() {
            return Ok(None);
        }
        let values: Vec<f32> = events
            .iter()
            .map(|e| e.field("value").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32)
            .collect();
        Ok(Some(Array2::from_shape_vec((events.len(), 1), values).map_err(|e| PreprocessError::InvalidEvent(e.to_string()))?))
    }
}

pub fn value_event(value: f64, timestamp: f64) -> TelemetryEvent {
    TelemetryEvent::new(timestamp).with_field("value", value)
}
