//! Linear Autoencoder - reference TrainableModel
//!
//! Bottleneck autoencoder tuyến tính (encoder d×k, decoder k×d), train bằng
//! mini-batch gradient descent trên MSE. Anomaly score = reconstruction error
//! trung bình của từng row.
//!
//! Dùng cho event đơn lẻ, hoặc cho sequence khi các window được flatten thành
//! một row (`input_dim = sequence_length * features`).

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::threshold::ThresholdConfig;
use super::{FitParams, LossHistory, ModelError, Prediction, TrainableModel, TrainingTarget, ValidationSet};

const MODEL_KIND: &str = "linear_autoencoder";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoencoderConfig {
    pub encoding_dim: usize,
    pub learning_rate: f64,
    pub threshold: ThresholdConfig,
    pub seed: u64,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            encoding_dim: 8,
            learning_rate: 0.01,
            threshold: ThresholdConfig::default(),
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearAutoencoder {
    config: AutoencoderConfig,
    input_dim: usize,
    encoder: Array2<f32>,
    encoder_bias: Array1<f32>,
    decoder: Array2<f32>,
    decoder_bias: Array1<f32>,
    threshold: f32,
}

/// Plain-data form used by `to_bytes` / `from_bytes`
#[derive(Serialize, Deserialize)]
struct AutoencoderState {
    config: AutoencoderConfig,
    input_dim: usize,
    threshold: f32,
    weights: Vec<f32>,
}

impl LinearAutoencoder {
    /// Fresh model with seeded random weights. Untrained models flag nothing.
    pub fn new(config: AutoencoderConfig, input_dim: usize) -> Self {
        let k = config.encoding_dim.max(1);
        let d = input_dim.max(1);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let scale = 1.0 / (d as f32).sqrt();

        let encoder = Array2::from_shape_fn((d, k), |_| rng.gen_range(-scale..scale));
        let decoder = Array2::from_shape_fn((k, d), |_| rng.gen_range(-scale..scale));

        Self {
            config: AutoencoderConfig { encoding_dim: k, ..config },
            input_dim: d,
            encoder,
            encoder_bias: Array1::zeros(k),
            decoder,
            decoder_bias: Array1::zeros(d),
            threshold: f32::MAX,
        }
    }

    /// Override the anomaly threshold
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.config.learning_rate
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ModelError> {
        let state: AutoencoderState = serde_json::from_slice(bytes)?;
        let mut model = Self::new(state.config, state.input_dim);
        model.set_weights(&state.weights)?;
        model.threshold = state.threshold;
        Ok(model)
    }

    fn check_columns(&self, x: &ArrayView2<'_, f32>) -> Result<(), ModelError> {
        if x.ncols() != self.input_dim {
            return Err(ModelError::ShapeMismatch {
                expected: self.input_dim,
                actual: x.ncols(),
            });
        }
        Ok(())
    }

    fn reconstruct(&self, x: &ArrayView2<'_, f32>) -> Array2<f32> {
        let mut hidden = x.dot(&self.encoder);
        hidden += &self.encoder_bias;
        let mut out = hidden.dot(&self.decoder);
        out += &self.decoder_bias;
        out
    }

    /// Mean squared reconstruction error per row
    fn row_errors(&self, x: &ArrayView2<'_, f32>) -> Vec<f32> {
        let diff = &self.reconstruct(x) - x;
        diff.mapv(|v| v * v)
            .mean_axis(Axis(1))
            .map(|m| m.to_vec())
            .unwrap_or_default()
    }

    /// Rows the objective applies to: all rows, or the normal-labelled ones
    fn training_rows(&self, x: &ArrayView2<'_, f32>, target: &TrainingTarget) -> Result<Array2<f32>, ModelError> {
        match target {
            TrainingTarget::Reconstruction => Ok(x.to_owned()),
            TrainingTarget::Labels(labels) => {
                if labels.len() != x.nrows() {
                    return Err(ModelError::TargetMismatch {
                        rows: x.nrows(),
                        targets: labels.len(),
                    });
                }
                let normal: Vec<usize> = labels
                    .iter()
                    .enumerate()
                    .filter(|(_, label)| label.abs() < 0.5)
                    .map(|(i, _)| i)
                    .collect();
                if normal.is_empty() {
                    return Ok(Array2::zeros((0, x.ncols())));
                }
                Ok(x.select(Axis(0), &normal))
            }
        }
    }

    fn step(&mut self, batch: ArrayView2<'_, f32>) {
        let n = batch.nrows();
        if n == 0 {
            return;
        }

        let mut hidden = batch.dot(&self.encoder);
        hidden += &self.encoder_bias;
        let mut out = hidden.dot(&self.decoder);
        out += &self.decoder_bias;

        let scale = 2.0 / (n * self.input_dim) as f32;
        let grad_out = (&out - &batch) * scale;

        let d_decoder = hidden.t().dot(&grad_out);
        let d_decoder_bias = grad_out.sum_axis(Axis(0));
        let grad_hidden = grad_out.dot(&self.decoder.t());
        let d_encoder = batch.t().dot(&grad_hidden);
        let d_encoder_bias = grad_hidden.sum_axis(Axis(0));

        let lr = self.config.learning_rate as f32;
        self.decoder.scaled_add(-lr, &d_decoder);
        self.decoder_bias.scaled_add(-lr, &d_decoder_bias);
        self.encoder.scaled_add(-lr, &d_encoder);
        self.encoder_bias.scaled_add(-lr, &d_encoder_bias);
    }

    fn weight_count(&self) -> usize {
        let k = self.config.encoding_dim;
        let d = self.input_dim;
        d * k + k + k * d + d
    }
}

fn mean(values: &[f32]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| *v as f64).sum::<f64>() / values.len() as f64
}

impl TrainableModel for LinearAutoencoder {
    fn kind(&self) -> &'static str {
        MODEL_KIND
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict(&self, x: ArrayView2<'_, f32>) -> Result<Prediction, ModelError> {
        self.check_columns(&x)?;
        let scores = self.row_errors(&x);
        let flags = scores.iter().map(|s| *s > self.threshold).collect();
        Ok(Prediction { scores, flags })
    }

    fn fit(
        &mut self,
        x: ArrayView2<'_, f32>,
        target: &TrainingTarget,
        params: FitParams,
        validation: Option<&ValidationSet>,
    ) -> Result<LossHistory, ModelError> {
        self.check_columns(&x)?;
        let rows = self.training_rows(&x, target)?;
        if rows.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet("no normal-labelled rows".to_string()));
        }

        let batch_size = params.batch_size.max(1);
        let mut history = LossHistory::default();

        for epoch in 0..params.epochs {
            let mut start = 0;
            while start < rows.nrows() {
                let end = (start + batch_size).min(rows.nrows());
                self.step(rows.slice(s![start..end, ..]));
                start = end;
            }

            let loss = mean(&self.row_errors(&rows.view()));
            if !loss.is_finite() {
                return Err(ModelError::Diverged { epoch, loss });
            }
            history.loss.push(loss);

            if let Some(val) = validation {
                history.val_loss.push(self.evaluate(val.features.view(), &val.target)?);
            }
        }

        self.threshold = self.config.threshold.calibrate(&self.row_errors(&rows.view()));
        log::debug!(
            "Autoencoder fit: rows={}, epochs={}, final_loss={:?}, threshold={:.6}",
            rows.nrows(),
            params.epochs,
            history.final_loss(),
            self.threshold
        );

        Ok(history)
    }

    fn evaluate(&self, x: ArrayView2<'_, f32>, target: &TrainingTarget) -> Result<f64, ModelError> {
        self.check_columns(&x)?;
        let rows = self.training_rows(&x, target)?;
        if rows.nrows() == 0 {
            return Err(ModelError::EmptyTrainingSet("no normal-labelled rows to evaluate".to_string()));
        }
        Ok(mean(&self.row_errors(&rows.view())))
    }

    fn clone_model(&self) -> Box<dyn TrainableModel> {
        Box::new(self.clone())
    }

    fn weights(&self) -> Vec<f32> {
        let mut weights = Vec::with_capacity(self.weight_count());
        weights.extend(self.encoder.iter().copied());
        weights.extend(self.encoder_bias.iter().copied());
        weights.extend(self.decoder.iter().copied());
        weights.extend(self.decoder_bias.iter().copied());
        weights
    }

    fn set_weights(&mut self, weights: &[f32]) -> Result<(), ModelError> {
        let expected = self.weight_count();
        if weights.len() != expected {
            return Err(ModelError::WeightCount { expected, actual: weights.len() });
        }

        let k = self.config.encoding_dim;
        let d = self.input_dim;
        let (enc, rest) = weights.split_at(d * k);
        let (enc_b, rest) = rest.split_at(k);
        let (dec, dec_b) = rest.split_at(k * d);

        self.encoder = Array2::from_shape_vec((d, k), enc.to_vec())
            .map_err(|e| ModelError::Other(e.to_string()))?;
        self.encoder_bias = Array1::from(enc_b.to_vec());
        self.decoder = Array2::from_shape_vec((k, d), dec.to_vec())
            .map_err(|e| ModelError::Other(e.to_string()))?;
        self.decoder_bias = Array1::from(dec_b.to_vec());
        Ok(())
    }

    fn threshold(&self) -> f32 {
        self.threshold
    }

    fn set_learning_rate(&mut self, learning_rate: f64) {
        self.config.learning_rate = learning_rate;
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ModelError> {
        let state = AutoencoderState {
            config: self.config,
            input_dim: self.input_dim,
            threshold: self.threshold,
            weights: self.weights(),
        };
        Ok(serde_json::to_vec(&state)?)
    }
}
