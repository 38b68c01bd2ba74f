//! Detection History - bounded FIFO của detections bất thường
//!
//! Feedback tra cứu theo id ở đây. Append và lookup dùng chung một lock nên
//! feedback luôn thấy detection đã ghi trước đó.

use std::collections::VecDeque;

use parking_lot::RwLock;

use super::types::DetectionRecord;

#[derive(Debug)]
pub struct DetectionHistory {
    records: RwLock<VecDeque<DetectionRecord>>,
    capacity: usize,
}

impl DetectionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, record: DetectionRecord) {
        let mut records = self.records.write();
        records.push_back(record);
        while records.len() > self.capacity {
            if let Some(evicted) = records.pop_front() {
                log::trace!("Detection history full, evicted {}", evicted.id);
            }
        }
    }

    /// First record with this id
    pub fn find(&self, id: &str) -> Option<DetectionRecord> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// N most recent records, oldest first
    pub fn recent(&self, limit: usize) -> Vec<DetectionRecord> {
        let records = self.records.read();
        let start = records.len().saturating_sub(limit);
        records.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
