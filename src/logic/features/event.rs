//! Telemetry Event - raw input của detection pipeline
//!
//! Event từ collector (syscall, network, process, file, container) giữ
//! nguyên các field dạng JSON; preprocessor chọn field theo layout.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::PreprocessError;

// ============================================================================
// EVENT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Syscall,
    Network,
    Process,
    File,
    Container,
}

impl EventType {
    pub const ALL: [EventType; 5] = [
        EventType::Syscall,
        EventType::Network,
        EventType::Process,
        EventType::File,
        EventType::Container,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Syscall => "syscall",
            EventType::Network => "network",
            EventType::Process => "process",
            EventType::File => "file",
            EventType::Container => "container",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EventType {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "syscall" => Ok(EventType::Syscall),
            "network" => Ok(EventType::Network),
            "process" => Ok(EventType::Process),
            "file" => Ok(EventType::File),
            "container" => Ok(EventType::Container),
            _ => Err(PreprocessError::UnknownEventType(s.to_string())),
        }
    }
}

// ============================================================================
// TELEMETRY EVENT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Epoch seconds
    #[serde(default)]
    pub timestamp: f64,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TelemetryEvent {
    pub fn new(timestamp: f64) -> Self {
        Self {
            id: None,
            timestamp,
            fields: Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Ground-truth label carried by replay datasets (`label`: bool or 0/1)
    pub fn label(&self) -> Option<bool> {
        match self.fields.get("label")? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_parse() {
        assert_eq!("Network".parse::<EventType>().unwrap(), EventType::Network);
        assert!(matches!(
            "kernel".parse::<EventType>(),
            Err(PreprocessError::UnknownEventType(_))
        ));
    }

    #[test]
    fn test_event_json_flatten() {
        let json = r#"{"id":"e-1","timestamp":12.5,"syscall_id":59,"label":1}"#;
        let event: TelemetryEvent = serde_json::from_str(json).unwrap();

        assert_eq!(event.id.as_deref(), Some("e-1"));
        assert_eq!(event.timestamp, 12.5);
        assert_eq!(event.field("syscall_id").and_then(|v| v.as_i64()), Some(59));
        assert_eq!(event.label(), Some(true));
    }
}
