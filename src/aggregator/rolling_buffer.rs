//! Fixed-capacity FIFO store of recent readings
//!
//! Entries are kept in insertion order. Readings from different feeds may
//! arrive out of timestamp order, so every timestamp-sensitive query sorts
//! or scans by `observed_at` instead of trusting position.

use crate::events::Reading;
use std::collections::VecDeque;

/// Ordered sequence of readings with capacity-based eviction
#[derive(Debug, Clone)]
pub struct RollingBuffer {
    entries: VecDeque<Reading>,
    capacity: usize,
}

impl RollingBuffer {
    /// Create an empty buffer holding at most `capacity` readings
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest-inserted entries over capacity
    ///
    /// Returns the evicted readings.
    pub fn push(&mut self, reading: Reading) -> Vec<Reading> {
        self.entries.push_back(reading);
        self.enforce_capacity()
    }

    /// Whether a reading with this id is buffered
    pub fn contains_id(&self, id: &str) -> bool {
        self.entries.iter().any(|reading| reading.id == id)
    }

    /// Reading with the greatest `observed_at`; ties go to the later insert
    pub fn latest(&self) -> Option<&Reading> {
        self.entries.iter().max_by_key(|reading| reading.observed_at)
    }

    /// Readings in insertion order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Reading> {
        self.entries.iter()
    }

    /// Copy of the buffer sorted by ascending timestamp
    ///
    /// The sort is stable, so equal timestamps keep insertion order.
    pub fn sorted(&self) -> Vec<Reading> {
        let mut readings: Vec<Reading> = self.entries.iter().cloned().collect();
        readings.sort_by_key(|reading| reading.observed_at);
        readings
    }

    /// Number of buffered readings
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer holds no readings
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of readings retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn enforce_capacity(&mut self) -> Vec<Reading> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                evicted.push(oldest);
            }
        }
        evicted
    }
}
