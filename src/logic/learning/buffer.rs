//! Sample Buffer - Buffer management for retraining
//!
//! Gom samples (features, label, timestamp) chờ update cycle kế tiếp.
//! Bounded FIFO: đầy thì evict sample cũ nhất.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::types::{BufferStats, Sample};

#[derive(Debug)]
pub struct SampleBuffer {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn add(&self, sample: Sample) {
        self.extend(std::iter::once(sample));
    }

    /// Append all samples under one lock, evicting oldest on overflow
    pub fn extend(&self, samples: impl IntoIterator<Item = Sample>) {
        let mut buffer = self.samples.lock();
        let mut evicted = 0usize;

        for sample in samples {
            if buffer.len() >= self.capacity {
                buffer.pop_front();
                evicted += 1;
            }
            buffer.push_back(sample);
        }

        if evicted > 0 {
            log::debug!("Sample buffer full, evicted {} oldest samples", evicted);
        }
    }

    pub fn size(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    /// Remove and return everything buffered, in insertion order
    pub fn drain(&self) -> Vec<Sample> {
        let mut buffer = self.samples.lock();
        buffer.drain(..).collect()
    }

    pub fn stats(&self) -> BufferStats {
        let buffer = self.samples.lock();

        let timestamp_range = buffer.iter().fold(None, |range: Option<(f64, f64)>, s| match range {
            None => Some((s.timestamp, s.timestamp)),
            Some((lo, hi)) => Some((lo.min(s.timestamp), hi.max(s.timestamp))),
        });

        BufferStats {
            sample_count: buffer.len(),
            has_labels: !buffer.is_empty() && buffer.iter().all(|s| s.label.is_some()),
            timestamp_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Sample {
        Sample::new(vec![i as f32], None, i as f64)
    }

    #[test]
    fn test_fifo_eviction_keeps_newest() {
        let buffer = SampleBuffer::new(3);
        buffer.extend((0..5).map(sample));

        let drained = buffer.drain();
        let kept: Vec<f32> = drained.iter().map(|s| s.features[0]).collect();
        assert_eq!(kept, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_drain_empties_buffer() {
        let buffer = SampleBuffer::new(10);
        buffer.add(sample(1));
        buffer.add(sample(2));

        assert_eq!(buffer.drain().len(), 2);
        assert_eq!(buffer.size(), 0);
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn test_stats() {
        let buffer = SampleBuffer::new(10);
        assert_eq!(buffer.stats(), BufferStats::default());

        buffer.add(Sample::new(vec![0.0], Some(0), 20.0));
        buffer.add(Sample::new(vec![0.0], Some(1), 10.0));
        let stats = buffer.stats();
        assert_eq!(stats.sample_count, 2);
        assert!(stats.has_labels);
        assert_eq!(stats.timestamp_range, Some((10.0, 20.0)));

        buffer.add(sample(30));
        assert!(!buffer.stats().has_labels);
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let buffer = SampleBuffer::new(10_000);

        std::thread::scope(|s| {
            for t in 0..4 {
                let buffer = &buffer;
                s.spawn(move || {
                    for i in 0..250 {
                        buffer.add(sample(t * 1000 + i));
                    }
                });
            }
        });

        assert_eq!(buffer.drain().len(), 1000);
    }
}
