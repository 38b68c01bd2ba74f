//! Threshold Calibration
//!
//! Quản lý ngưỡng phát hiện anomaly.
//! Ngưỡng = percentile của reconstruction error trên dữ liệu training.

use serde::{Deserialize, Serialize};

/// Threshold Configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Percentile of training errors (0 - 100)
    pub percentile: f64,

    /// Minimum threshold (floor)
    pub min_threshold: f32,

    /// Maximum threshold (ceiling)
    pub max_threshold: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            percentile: 95.0,
            min_threshold: 0.0,
            max_threshold: f32::MAX,
        }
    }
}

impl ThresholdConfig {
    pub fn new(percentile: f64) -> Self {
        Self {
            percentile,
            ..Default::default()
        }
    }

    /// High sensitivity (lower threshold)
    pub fn high_sensitivity() -> Self {
        Self::new(90.0)
    }

    /// Low sensitivity (higher threshold)
    pub fn low_sensitivity() -> Self {
        Self::new(99.0)
    }

    /// Threshold for a set of training errors, clamped to bounds
    pub fn calibrate(&self, errors: &[f32]) -> f32 {
        percentile(errors, self.percentile)
            .max(self.min_threshold)
            .min(self.max_threshold)
    }
}

/// Linear-interpolated percentile. Non-finite values are ignored;
/// returns 0.0 when nothing is left.
pub fn percentile(values: &[f32], pct: f64) -> f32 {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return 0.0;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pct = pct.clamp(0.0, 100.0);
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = (rank - lower as f64) as f32;

    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
