//! Event Preprocessor - reference `Preprocessor`
//!
//! Raw event → feature row theo `ColumnLayout`:
//! - numerical: giá trị số (thiếu = 0)
//! - text: length, word count, special chars
//! - ip: 4 octets / 255
//! - list: số phần tử
//! - duration: end - start
//! - categorical: hash vào CATEGORY_BUCKETS (không scale)
//!
//! Phần continuous được standard-scale. Scaler fit một lần (batch đầu tiên
//! hoặc gọi `fit`) rồi giữ nguyên, nên output deterministic.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ndarray::Array2;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::{EventType, TelemetryEvent};
use super::layout::{ColumnLayout, LayoutInfo, CATEGORY_BUCKETS, IP_FEATURES};
use super::{PreprocessError, Preprocessor};

static SPECIAL_CHARS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9\s]").ok());

const MIN_STD: f32 = 1e-6;

// ============================================================================
// STANDARD SCALER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f32>], width: usize) -> Self {
        let n = rows.len().max(1) as f32;
        let mut mean = vec![0.0f32; width];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v / n;
            }
        }

        let mut var = vec![0.0f32; width];
        for row in rows {
            for ((acc, v), m) in var.iter_mut().zip(row).zip(&mean) {
                *acc += (v - m).powi(2) / n;
            }
        }

        // Constant columns keep unit scale
        let std = var
            .into_iter()
            .map(|v| if v.sqrt() < MIN_STD { 1.0 } else { v.sqrt() })
            .collect();

        Self { mean, std }
    }

    pub fn apply(&self, row: &mut [f32]) {
        for ((v, m), s) in row.iter_mut().zip(&self.mean).zip(&self.std) {
            *v = (*v - m) / s;
        }
    }
}

// ============================================================================
// FIELD EXTRACTION
// ============================================================================

fn numeric(value: Option<&Value>) -> f32 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
        Some(Value::Bool(b)) => f32::from(u8::from(*b)),
        Some(Value::String(s)) => s.trim().parse::<f32>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Epoch seconds from a number or an RFC 3339 string
fn time_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.timestamp_millis() as f64 / 1000.0),
        _ => None,
    }
}

fn ip_octets(value: Option<&Value>) -> [f32; IP_FEATURES] {
    let parsed = match value {
        Some(Value::String(s)) => s.parse::<Ipv4Addr>().ok(),
        _ => None,
    };
    parsed
        .map(|ip| ip.octets().map(|o| o as f32 / 255.0))
        .unwrap_or([0.0; IP_FEATURES])
}

fn bucket(column: &str, value: &Value) -> usize {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(column.as_bytes());
    hasher.update(&[0]);
    hasher.update(text(Some(value)).as_bytes());
    hasher.finalize() as usize % CATEGORY_BUCKETS
}

/// Unscaled continuous part of one row
fn continuous_row(layout: &ColumnLayout, event: &TelemetryEvent) -> Vec<f32> {
    let mut row = Vec::with_capacity(layout.continuous_count());

    for col in layout.numerical {
        row.push(numeric(event.field(col)));
    }
    for col in layout.text {
        let s = text(event.field(col));
        row.push(s.chars().count() as f32);
        row.push(s.split_whitespace().count() as f32);
        row.push(SPECIAL_CHARS.as_ref().map_or(0, |re| re.find_iter(&s).count()) as f32);
    }
    for col in layout.ip_addresses {
        row.extend(ip_octets(event.field(col)));
    }
    for col in layout.lists {
        let count = match event.field(col) {
            Some(Value::Array(items)) => items.len(),
            _ => 0,
        };
        row.push(count as f32);
    }
    if let Some((start, end)) = layout.duration {
        let duration = match (time_value(event.field(start)), time_value(event.field(end))) {
            (Some(s), Some(e)) => (e - s) as f32,
            _ => 0.0,
        };
        row.push(duration);
    }

    row
}

fn category_row(layout: &ColumnLayout, event: &TelemetryEvent) -> Vec<f32> {
    if layout.categorical.is_empty() {
        return Vec::new();
    }
    let mut buckets = vec![0.0f32; CATEGORY_BUCKETS];
    for col in layout.categorical {
        if let Some(value) = event.field(col) {
            buckets[bucket(col, value)] += 1.0;
        }
    }
    buckets
}

// ============================================================================
// EVENT PREPROCESSOR
// ============================================================================

#[derive(Debug, Default)]
pub struct EventPreprocessor {
    scalers: RwLock<HashMap<EventType, StandardScaler>>,
}

impl EventPreprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// (Re)fit the scaler for `event_type` on a training batch
    pub fn fit(&self, events: &[TelemetryEvent], event_type: &str) -> Result<(), PreprocessError> {
        let event_type: EventType = event_type.parse()?;
        let layout = ColumnLayout::for_event(event_type);
        let rows: Vec<Vec<f32>> = events.iter().map(|e| continuous_row(layout, e)).collect();

        let scaler = StandardScaler::fit(&rows, layout.continuous_count());
        self.scalers.write().insert(event_type, scaler);
        log::info!("Preprocessor fitted for {} on {} events", event_type, events.len());
        Ok(())
    }

    pub fn is_fitted(&self, event_type: EventType) -> bool {
        self.scalers.read().contains_key(&event_type)
    }

    pub fn feature_dim(&self, event_type: EventType) -> usize {
        ColumnLayout::for_event(event_type).feature_count()
    }

    pub fn layout_info(&self, event_type: EventType) -> LayoutInfo {
        LayoutInfo::current(event_type)
    }

    pub fn scaler(&self, event_type: EventType) -> Option<StandardScaler> {
        self.scalers.read().get(&event_type).cloned()
    }
}

impl Preprocessor for EventPreprocessor {
    fn transform(&self, events: &[TelemetryEvent], event_type: &str) -> Result<Option<Array2<f32>>, PreprocessError> {
        let event_type: EventType = event_type.parse()?;
        if events.is_empty() {
            return Ok(None);
        }

        let layout = ColumnLayout::for_event(event_type);
        let mut continuous: Vec<Vec<f32>> = events.iter().map(|e| continuous_row(layout, e)).collect();

        let scaler = {
            let existing = self.scalers.read().get(&event_type).cloned();
            match existing {
                Some(scaler) => scaler,
                None => {
                    // First batch fits the scaler; a concurrent first batch may win instead
                    let fitted = StandardScaler::fit(&continuous, layout.continuous_count());
                    let mut scalers = self.scalers.write();
                    scalers.entry(event_type).or_insert(fitted).clone()
                }
            }
        };

        let width = layout.feature_count();
        let mut data = Vec::with_capacity(events.len() * width);
        for (row, event) in continuous.iter_mut().zip(events) {
            scaler.apply(row);
            data.extend_from_slice(row);
            data.extend(category_row(layout, event));
        }

        let matrix = Array2::from_shape_vec((events.len(), width), data)
            .map_err(|e| PreprocessError::InvalidEvent(e.to_string()))?;
        Ok(Some(matrix))
    }
}
