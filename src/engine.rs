//! Single-consumer ingest loop
//!
//! The [`TelemetryEngine`] is the only owner of the [`Aggregator`] and the
//! [`AlertFeed`]. Feeds send readings over an mpsc channel, the user sends
//! [`EngineCommand`]s over another, and every change is published as an
//! immutable [`DashboardView`] on a watch channel.

use crate::aggregator::{Aggregator, IngestOutcome};
use crate::alerts::{aqi_category, Alert, AlertFeed};
use crate::events::{Metric, Reading, Timestamp};
use crate::monitoring::EngineStats;
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Placeholder rendered for a metric with no data
pub const NO_DATA: &str = "--";

/// Requests handled by the ingest loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    /// Remove every alert from the feed
    ClearAlerts,
    /// Stop the ingest loop
    Shutdown,
}

/// Immutable snapshot of the engine state for display
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardView {
    /// Buffered readings, ascending by timestamp
    pub readings: Vec<Reading>,
    /// Current value of every metric that has data
    pub current: BTreeMap<Metric, f64>,
    /// Alerts in display order
    pub alerts: Vec<Alert>,
    pub buffer_capacity: usize,
    pub updated_at: Option<Timestamp>,
}

impl DashboardView {
    /// Current value of `metric`, `None` when never observed
    pub fn current_value(&self, metric: Metric) -> Option<f64> {
        self.current.get(&metric).copied()
    }

    /// Value to one decimal, or `--` when there is no data
    pub fn display_value(&self, metric: Metric) -> String {
        self.current_value(metric)
            .map(|value| format!("{:.1}", value))
            .unwrap_or_else(|| NO_DATA.to_string())
    }

    /// Band label for the current air quality
    pub fn air_quality_category(&self) -> Option<&'static str> {
        self.current_value(Metric::AirQuality).map(aqi_category)
    }
}

/// Channel ends used to talk to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    pub readings: mpsc::Sender<Reading>,
    pub commands: mpsc::Sender<EngineCommand>,
    pub view: watch::Receiver<DashboardView>,
    pub last_reading: watch::Receiver<Option<Reading>>,
}

impl EngineHandle {
    /// Ask the engine to clear the alert feed
    pub async fn clear_alerts(&self) -> bool {
        self.commands.send(EngineCommand::ClearAlerts).await.is_ok()
    }

    /// Ask the engine to stop
    pub async fn shutdown(&self) -> bool {
        self.commands.send(EngineCommand::Shutdown).await.is_ok()
    }

    /// Latest published view
    pub fn view(&self) -> DashboardView {
        self.view.borrow().clone()
    }
}

/// Owner of the aggregator and alert feed
pub struct TelemetryEngine {
    aggregator: Aggregator,
    alerts: AlertFeed,
    readings_rx: mpsc::Receiver<Reading>,
    commands_rx: mpsc::Receiver<EngineCommand>,
    view_tx: watch::Sender<DashboardView>,
    last_tx: watch::Sender<Option<Reading>>,
    stats_interval: Option<Duration>,
}

impl TelemetryEngine {
    /// Create an engine and the handle for feeding it
    ///
    /// `channel_capacity` bounds the reading channel; feeds wait when it is
    /// full.
    pub fn new(
        aggregator: Aggregator,
        alerts: AlertFeed,
        channel_capacity: usize,
    ) -> (Self, EngineHandle) {
        let (readings_tx, readings_rx) = mpsc::channel(channel_capacity.max(1));
        let (commands_tx, commands_rx) = mpsc::channel(8);

        let initial = DashboardView {
            buffer_capacity: aggregator.capacity(),
            ..DashboardView::default()
        };
        let (view_tx, view_rx) = watch::channel(initial);
        let (last_tx, last_rx) = watch::channel(None);

        let engine = Self {
            aggregator,
            alerts,
            readings_rx,
            commands_rx,
            view_tx,
            last_tx,
            stats_interval: None,
        };
        let handle = EngineHandle {
            readings: readings_tx,
            commands: commands_tx,
            view: view_rx,
            last_reading: last_rx,
        };
        (engine, handle)
    }

    /// Log a stats summary every `interval`
    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = Some(interval);
        self
    }

    /// Counters shared with the aggregator
    pub fn stats(&self) -> Arc<EngineStats> {
        self.aggregator.stats().clone()
    }

    /// Process readings and commands until cancelled or shut down
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            "Telemetry engine started (buffer {}, alert feed {})",
            self.aggregator.capacity(),
            self.alerts.capacity()
        );

        // Disabled stats logging still needs a branch to select on
        let period = self.stats_interval.unwrap_or(Duration::from_secs(3600));
        let now = tokio::time::Instant::now();
        let mut stats_ticker =
            tokio::time::interval_at(now.checked_add(period).unwrap_or(now), period);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = self.commands_rx.recv() => match command {
                    Some(EngineCommand::ClearAlerts) => {
                        info!("Clearing {} alerts", self.alerts.len());
                        self.alerts.clear();
                        self.publish();
                    }
                    Some(EngineCommand::Shutdown) | None => break,
                },
                reading = self.readings_rx.recv() => match reading {
                    Some(reading) => {
                        if self.handle_reading(reading) {
                            self.publish();
                        }
                    }
                    None => break,
                },
                _ = stats_ticker.tick() => {
                    if self.stats_interval.is_some() {
                        self.aggregator.stats().log_summary();
                    }
                }
            }
        }

        info!("Telemetry engine stopped");
    }

    /// Ingest one reading; returns whether the state changed
    fn handle_reading(&mut self, reading: Reading) -> bool {
        match self.aggregator.ingest(reading) {
            Ok(IngestOutcome::Accepted(alerts)) => {
                for alert in &alerts {
                    warn!("Alert: {}", alert.message);
                }
                self.alerts.append(alerts);
                true
            }
            Ok(IngestOutcome::Duplicate) => false,
            Err(e) => {
                warn!("Rejected reading: {}", e);
                false
            }
        }
    }

    fn publish(&self) {
        let current = Metric::ALL
            .iter()
            .filter_map(|metric| {
                self.aggregator
                    .current_value(*metric)
                    .map(|value| (*metric, value))
            })
            .collect();

        let view = DashboardView {
            readings: self.aggregator.snapshot(),
            current,
            alerts: self.alerts.snapshot(),
            buffer_capacity: self.aggregator.capacity(),
            updated_at: Some(Utc::now()),
        };
        self.view_tx.send_replace(view);

        let latest = self.aggregator.latest().cloned();
        self.last_tx.send_if_modified(|last| {
            if *last == latest {
                false
            } else {
                *last = latest;
                true
            }
        });
        debug!("Published dashboard view ({} readings)", self.aggregator.len());
    }
}
