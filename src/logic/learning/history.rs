//! Version History - Snapshot ledger & rollback source
//!
//! Ledger append-only của các model version. Version 1 (base) được pin,
//! không bao giờ bị evict; khi vượt capacity thì evict version cũ nhất
//! sau base.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use super::types::{ModelVersion, TrendPoint, UpdateMetrics, VersionInfo};
use crate::logic::error::{EngineError, EngineResult};
use crate::logic::model::ModelHandle;

// ============================================================================
// HISTORY STRUCT
// ============================================================================

#[derive(Debug)]
pub struct VersionHistory {
    base: Option<ModelVersion>,
    recent: VecDeque<ModelVersion>,
    /// Total entries kept, base included
    capacity: usize,
    latest: u32,
}

impl VersionHistory {
    /// Capacity below 2 is raised to 2: base + active always fit
    pub fn new(capacity: usize) -> Self {
        Self {
            base: None,
            recent: VecDeque::new(),
            capacity: capacity.max(2),
            latest: 0,
        }
    }

    /// Rebuild from persisted entries (sorted by version; the first one is the base)
    pub fn from_entries(capacity: usize, mut entries: Vec<ModelVersion>) -> Self {
        entries.sort_by_key(|e| e.version);

        let mut history = Self::new(capacity);
        history.latest = entries.last().map(|e| e.version).unwrap_or(0);

        let mut entries = entries.into_iter();
        history.base = entries.next();
        history.recent.extend(entries);
        history.evict();
        history
    }

    /// Append a version numbered `latest + 1`. The first record becomes the pinned base.
    pub fn record(
        &mut self,
        snapshot: Option<ModelHandle>,
        created_at: DateTime<Utc>,
        metrics: Option<UpdateMetrics>,
        parent_version: Option<u32>,
        rollback_source: Option<u32>,
    ) -> u32 {
        self.latest += 1;
        let entry = ModelVersion {
            version: self.latest,
            snapshot,
            created_at,
            metrics,
            parent_version,
            rollback_source,
        };

        if self.base.is_none() {
            self.base = Some(entry);
        } else {
            self.recent.push_back(entry);
            self.evict();
        }

        self.latest
    }

    fn evict(&mut self) {
        while self.len() > self.capacity {
            match self.recent.pop_front() {
                Some(removed) => log::trace!("Evicted model version {} from history", removed.version),
                None => break,
            }
        }
    }

    pub fn get(&self, version: u32) -> EngineResult<&ModelVersion> {
        if version < 1 || version > self.latest {
            return Err(EngineError::VersionNotFound(version));
        }

        self.iter()
            .find(|e| e.version == version)
            .ok_or(EngineError::VersionNotFound(version))
    }

    pub fn len(&self) -> usize {
        usize::from(self.base.is_some()) + self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_none()
    }

    /// Entries in version order, base first
    pub fn iter(&self) -> impl Iterator<Item = &ModelVersion> {
        self.base.iter().chain(self.recent.iter())
    }

    pub fn versions(&self) -> Vec<VersionInfo> {
        self.iter().map(ModelVersion::info).collect()
    }

    /// (timestamp, final_loss, final_val_loss) of every entry carrying metrics
    pub fn trend(&self) -> Vec<TrendPoint> {
        self.iter()
            .filter_map(|e| {
                e.metrics.as_ref().map(|m| TrendPoint {
                    version: e.version,
                    timestamp: e.created_at,
                    final_loss: m.final_loss,
                    final_val_loss: m.final_val_loss,
                })
            })
            .collect()
    }
}
