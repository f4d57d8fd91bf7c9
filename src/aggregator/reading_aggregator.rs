//! Merge point for readings from every feed
//!
//! The [`Aggregator`] owns the rolling buffer. Each ingested reading is
//! validated, deduplicated by id, buffered with FIFO eviction and then
//! evaluated against the alert rules. Locally generated readings are also
//! handed to the persistence sink without waiting on the write.

use crate::aggregator::RollingBuffer;
use crate::alerts::{Alert, AlertEvaluator, RepeatSuppressor};
use crate::error::ReadingError;
use crate::events::{Metric, Reading};
use crate::monitoring::EngineStats;
use crate::persistence::PersistenceSink;
use log::{debug, warn};
use std::sync::Arc;

/// Result of ingesting one reading
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Reading was buffered; carries the alerts it raised
    Accepted(Vec<Alert>),
    /// A reading with the same id is already buffered
    Duplicate,
}

/// Owner of the rolling buffer and the alert path
pub struct Aggregator {
    buffer: RollingBuffer,
    evaluator: AlertEvaluator,
    suppressor: RepeatSuppressor,
    persistence: Option<(PersistenceSink, String)>,
    stats: Arc<EngineStats>,
}

impl Aggregator {
    /// Create an aggregator with default thresholds and no persistence
    ///
    /// # Examples
    ///
    /// ```
    /// use vitalwatch::aggregator::Aggregator;
    ///
    /// let aggregator = Aggregator::new(20);
    /// assert!(aggregator.is_empty());
    /// ```
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RollingBuffer::new(capacity),
            evaluator: AlertEvaluator::default(),
            suppressor: RepeatSuppressor::default(),
            persistence: None,
            stats: Arc::new(EngineStats::new()),
        }
    }

    /// Use a custom evaluator
    pub fn with_evaluator(mut self, evaluator: AlertEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Filter repeated alerts through `suppressor`
    pub fn with_suppressor(mut self, suppressor: RepeatSuppressor) -> Self {
        self.suppressor = suppressor;
        self
    }

    /// Share counters with the engine and workers
    pub fn with_stats(mut self, stats: Arc<EngineStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Forward locally generated readings to `sink` under `user_id`
    pub fn with_persistence(mut self, sink: PersistenceSink, user_id: impl Into<String>) -> Self {
        self.persistence = Some((sink, user_id.into()));
        self
    }

    /// Validate, deduplicate, buffer and evaluate a reading
    ///
    /// # Errors
    ///
    /// Returns `ReadingError::Malformed` if any numeric field is not finite.
    /// Nothing is buffered or evaluated in that case.
    pub fn ingest(&mut self, reading: Reading) -> Result<IngestOutcome, ReadingError> {
        if let Err(e) = reading.validate() {
            self.stats.record_rejected();
            return Err(e);
        }

        if self.buffer.contains_id(&reading.id) {
            debug!("Dropping duplicate reading {} from {}", reading.id, reading.origin);
            self.stats.record_duplicate();
            return Ok(IngestOutcome::Duplicate);
        }

        let raised = self.evaluator.evaluate(&reading);
        let raised_count = raised.len();
        let alerts = self.suppressor.filter(raised);
        self.stats
            .record_alerts(alerts.len(), raised_count - alerts.len());

        self.persist(&reading);

        debug!(
            "Accepted reading {} from {} ({} alerts)",
            reading.id,
            reading.origin,
            alerts.len()
        );
        let evicted = self.buffer.push(reading);
        if !evicted.is_empty() {
            debug!("Evicted {} readings from rolling buffer", evicted.len());
        }
        self.stats.record_accepted();

        Ok(IngestOutcome::Accepted(alerts))
    }

    fn persist(&self, reading: &Reading) {
        if reading.origin.is_durable() {
            return;
        }
        if let Some((sink, user_id)) = &self.persistence {
            if !sink.submit(user_id, reading) {
                warn!("Reading {} was not queued for persistence", reading.id);
            }
        }
    }

    /// Latest value of `metric` across buffered readings
    ///
    /// Picks the reading with the greatest timestamp among those carrying
    /// the metric. Ties go to the later-inserted reading.
    pub fn current_value(&self, metric: Metric) -> Option<f64> {
        self.buffer
            .iter()
            .filter_map(|reading| reading.value(metric).map(|value| (reading.observed_at, value)))
            .max_by_key(|(observed_at, _)| *observed_at)
            .map(|(_, value)| value)
    }

    /// Reading with the greatest timestamp
    pub fn latest(&self) -> Option<&Reading> {
        self.buffer.latest()
    }

    /// Buffered readings in ascending timestamp order
    pub fn snapshot(&self) -> Vec<Reading> {
        self.buffer.sorted()
    }

    /// Number of buffered readings
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no reading has been accepted yet
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Capacity of the rolling buffer
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// Counters updated on every ingest
    pub fn stats(&self) -> &Arc<EngineStats> {
        &self.stats
    }
}
