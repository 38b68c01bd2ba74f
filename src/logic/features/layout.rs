//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema for every event type**
//!
//! ## Rules (NEVER break these):
//! 1. Add column → increment FEATURE_VERSION
//! 2. Change order → increment FEATURE_VERSION
//! 3. Remove column → increment FEATURE_VERSION
//!
//! Model đã train phụ thuộc vào thứ tự cột, nên layout phải ổn định.

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use super::event::EventType;

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
pub const FEATURE_VERSION: u8 = 1;

/// Hashed buckets for categorical columns (shared per event type)
pub const CATEGORY_BUCKETS: usize = 16;

/// length, word count, special chars
pub const TEXT_FEATURES: usize = 3;

/// IPv4 octets
pub const IP_FEATURES: usize = 4;

// ============================================================================
// COLUMN LAYOUT (Authoritative source)
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ColumnLayout {
    pub numerical: &'static [&'static str],
    pub categorical: &'static [&'static str],
    pub text: &'static [&'static str],
    pub ip_addresses: &'static [&'static str],
    /// Array columns, encoded as their length
    pub lists: &'static [&'static str],
    /// (start, end) columns, encoded as the duration
    pub duration: Option<(&'static str, &'static str)>,
}

const SYSCALL: ColumnLayout = ColumnLayout {
    numerical: &["syscall_id", "return_value", "error_code", "duration_ns"],
    categorical: &["syscall_name", "container_id"],
    text: &["arguments"],
    ip_addresses: &[],
    lists: &[],
    duration: None,
};

const NETWORK: ColumnLayout = ColumnLayout {
    numerical: &["source_port", "destination_port", "bytes_sent", "bytes_received"],
    categorical: &["protocol", "connection_state", "container_id", "interface_name"],
    text: &[],
    ip_addresses: &["source_ip", "destination_ip"],
    lists: &[],
    duration: None,
};

const PROCESS: ColumnLayout = ColumnLayout {
    numerical: &["process_id", "parent_process_id", "user_id", "group_id", "exit_code"],
    categorical: &["event_type", "container_id", "namespace", "pod_name"],
    text: &["command", "arguments"],
    ip_addresses: &[],
    lists: &[],
    duration: Some(("start_time", "end_time")),
};

const FILE: ColumnLayout = ColumnLayout {
    numerical: &["process_id", "user_id", "group_id", "result", "permissions", "bytes_accessed"],
    categorical: &["operation", "container_id", "namespace", "pod_name"],
    text: &["path"],
    ip_addresses: &[],
    lists: &[],
    duration: None,
};

const CONTAINER: ColumnLayout = ColumnLayout {
    numerical: &["cpu_limit", "memory_limit"],
    categorical: &["event_type", "network_mode", "namespace", "pod_name", "node_name"],
    text: &["image_name", "command"],
    ip_addresses: &[],
    lists: &["capabilities", "mounts"],
    duration: None,
};

impl ColumnLayout {
    pub fn for_event(event_type: EventType) -> &'static ColumnLayout {
        match event_type {
            EventType::Syscall => &SYSCALL,
            EventType::Network => &NETWORK,
            EventType::Process => &PROCESS,
            EventType::File => &FILE,
            EventType::Container => &CONTAINER,
        }
    }

    /// Columns that go through the standard scaler
    pub fn continuous_count(&self) -> usize {
        self.numerical.len()
            + self.text.len() * TEXT_FEATURES
            + self.ip_addresses.len() * IP_FEATURES
            + self.lists.len()
            + usize::from(self.duration.is_some())
    }

    pub fn feature_count(&self) -> usize {
        self.continuous_count()
            + if self.categorical.is_empty() { 0 } else { CATEGORY_BUCKETS }
    }

    /// Feature names in exact output order
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numerical.iter().map(|c| format!("{}_scaled", c)).collect();

        for col in self.text {
            names.push(format!("{}_length", col));
            names.push(format!("{}_word_count", col));
            names.push(format!("{}_special_chars", col));
        }
        for col in self.ip_addresses {
            names.extend((0..IP_FEATURES).map(|i| format!("{}_octet_{}", col, i)));
        }
        for col in self.lists {
            names.push(format!("{}_count", col));
        }
        if self.duration.is_some() {
            names.push("duration".to_string());
        }
        if !self.categorical.is_empty() {
            names.extend((0..CATEGORY_BUCKETS).map(|i| format!("category_bucket_{}", i)));
        }
        names
    }
}

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 of version + feature names; detects layout drift between model and preprocessor
pub fn layout_hash(event_type: EventType) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);
    hasher.update(event_type.as_str().as_bytes());

    for name in ColumnLayout::for_event(event_type).feature_names() {
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
    }

    hasher.finalize()
}

/// Complete layout information for serialization/logging
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub event_type: EventType,
    pub version: u8,
    pub hash: u32,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

impl LayoutInfo {
    pub fn current(event_type: EventType) -> Self {
        let layout = ColumnLayout::for_event(event_type);
        Self {
            event_type,
            version: FEATURE_VERSION,
            hash: layout_hash(event_type),
            feature_count: layout.feature_count(),
            feature_names: layout.feature_names(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
