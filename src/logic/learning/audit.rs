//! Audit Trail - Ghi lại mọi chuyển đổi model version
//!
//! Mục đích: trace được vì sao model hiện tại là model này. Update bị
//! reject chỉ xuất hiện ở đây, không bao giờ trong VersionHistory.
//!
//! In-memory, giữ tối đa `capacity` entries gần nhất (FIFO).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_AUDIT_ENTRIES;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    BaseModelSet,
    UpdateCommitted,
    UpdateRejected,
    UpdateSkipped,
    RolledBack,
    FeedbackProcessed,
    StateRestored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub performance_change: Option<f64>,
    #[serde(default)]
    pub details: Option<String>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            action,
            version: None,
            performance_change: None,
            details: None,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_change(mut self, change: Option<f64>) -> Self {
        self.performance_change = change;
        self
    }

    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

#[derive(Debug)]
pub struct AuditTrail {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new(MAX_AUDIT_ENTRIES)
    }
}

impl AuditTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn log(&self, entry: AuditEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// N entries gần nhất, cũ trước
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.read();
        let start = entries.len().saturating_sub(limit);
        entries.iter().skip(start).cloned().collect()
    }

    /// N entries gần nhất theo action, mới trước
    pub fn by_action(&self, action: AuditAction, limit: usize) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|e| e.action == action)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
