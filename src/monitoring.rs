//! Self-monitoring counters for the telemetry engine
//!
//! Counters are shared between the ingest loop, the persistence worker and
//! the feeds, so they are plain atomics behind an `Arc`. A
//! [`StatsSnapshot`] is a point-in-time copy for logging or display.

use crate::events::Timestamp;
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for ingest, alerting and persistence
#[derive(Debug, Default)]
pub struct EngineStats {
    accepted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    alerts_emitted: AtomicU64,
    alerts_suppressed: AtomicU64,
    feed_failures: AtomicU64,
    persistence_submitted: AtomicU64,
    persistence_written: AtomicU64,
    persistence_shed: AtomicU64,
    persistence_failed: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub alerts_emitted: u64,
    pub alerts_suppressed: u64,
    pub feed_failures: u64,
    pub persistence_submitted: u64,
    pub persistence_written: u64,
    pub persistence_shed: u64,
    pub persistence_failed: u64,
}

impl EngineStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a reading added to the buffer
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a reading dropped as a duplicate
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a malformed reading
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Count alerts emitted and suppressed for one reading
    pub fn record_alerts(&self, emitted: usize, suppressed: usize) {
        self.alerts_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        self.alerts_suppressed
            .fetch_add(suppressed as u64, Ordering::Relaxed);
    }

    /// Count a feed-level failure
    pub fn record_feed_failure(&self) {
        self.feed_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a job accepted by the persistence queue
    pub fn record_persistence_submitted(&self) {
        self.persistence_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a successful write
    pub fn record_persistence_written(&self) {
        self.persistence_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a job dropped on a full queue
    pub fn record_persistence_shed(&self) {
        self.persistence_shed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed or timed out write
    pub fn record_persistence_failed(&self) {
        self.persistence_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            feed_failures: self.feed_failures.load(Ordering::Relaxed),
            persistence_submitted: self.persistence_submitted.load(Ordering::Relaxed),
            persistence_written: self.persistence_written.load(Ordering::Relaxed),
            persistence_shed: self.persistence_shed.load(Ordering::Relaxed),
            persistence_failed: self.persistence_failed.load(Ordering::Relaxed),
        }
    }

    /// Log a one-line summary and warn about unhealthy ratios
    pub fn log_summary(&self) -> StatsSnapshot {
        let stats = self.snapshot();
        let at: Timestamp = Utc::now();

        info!(
            "Engine stats at {}: accepted={}, duplicates={}, rejected={}, alerts={}, suppressed={}, feed_failures={}, persisted={}/{}",
            at.format("%H:%M:%S"),
            stats.accepted,
            stats.duplicates,
            stats.rejected,
            stats.alerts_emitted,
            stats.alerts_suppressed,
            stats.feed_failures,
            stats.persistence_written,
            stats.persistence_submitted
        );

        if stats.persistence_shed > 0 {
            warn!(
                "Persistence queue shed {} readings so far",
                stats.persistence_shed
            );
        }

        if stats.persistence_success_rate() < 90.0 {
            warn!(
                "Low persistence success rate: {:.1}%",
                stats.persistence_success_rate()
            );
        }

        stats
    }
}

impl StatsSnapshot {
    /// Written vs attempted writes, in percent; 100 when nothing finished yet
    pub fn persistence_success_rate(&self) -> f64 {
        let finished = self.persistence_written + self.persistence_failed;
        if finished == 0 {
            100.0
        } else {
            self.persistence_written as f64 / finished as f64 * 100.0
        }
    }
}
