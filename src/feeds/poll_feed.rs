use crate::events::{FeedKind, Reading};
use crate::monitoring::EngineStats;
use crate::store::ReadingStore;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Settings for [`run_poll_feed`]
#[derive(Debug, Clone)]
pub struct PollFeedConfig {
    /// Time between fetches; the first fetch happens immediately
    pub interval: Duration,
    /// Number of most recent rows to request
    pub limit: usize,
    /// Upper bound on one fetch
    pub fetch_timeout: Duration,
}

impl Default for PollFeedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            limit: 20,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Periodically re-fetch recent readings until cancelled
///
/// Each fetch is reordered to ascending timestamp before forwarding.
/// Failures are logged and the feed waits for the next tick.
pub async fn run_poll_feed(
    store: Arc<dyn ReadingStore>,
    tx: mpsc::Sender<Reading>,
    config: PollFeedConfig,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
) {
    info!(
        "Poll feed started (every {:?}, limit {})",
        config.interval, config.limit
    );
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(config.fetch_timeout, store.fetch_recent(config.limit)) => result,
        };

        let records = match fetched {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => {
                error!("Poll fetch failed: {}", e);
                stats.record_feed_failure();
                continue;
            }
            Err(_) => {
                error!("Poll fetch timed out after {:?}", config.fetch_timeout);
                stats.record_feed_failure();
                continue;
            }
        };

        let mut readings: Vec<Reading> = records
            .into_iter()
            .filter_map(|record| match record.into_reading(FeedKind::Poll) {
                Ok(reading) => Some(reading),
                Err(e) => {
                    warn!("Skipping undecodable polled record: {}", e);
                    None
                }
            })
            .collect();
        readings.sort_by_key(|reading| reading.observed_at);

        debug!("Poll feed forwarding {} readings", readings.len());
        for reading in readings {
            if tx.send(reading).await.is_err() {
                debug!("Reading channel closed, stopping poll feed");
                info!("Poll feed stopped");
                return;
            }
        }
    }

    info!("Poll feed stopped");
}
