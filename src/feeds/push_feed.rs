//! Insert-notification feed
//!
//! Subscribes through a [`ChangeSource`] and forwards each inserted row as a
//! reading. When the subscription fails or drops, the feed reconnects with
//! exponential backoff unless reconnecting is disabled, in which case it
//! stays idle until cancelled.

use crate::error::FeedError;
use crate::events::{FeedKind, Reading};
use crate::monitoring::EngineStats;
use crate::store::{ChangeSource, ChangeStream};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to `max_delay`
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Settings for [`run_push_feed`]
#[derive(Debug, Clone)]
pub struct PushFeedConfig {
    /// Reconnect after a failed or dropped subscription
    pub reconnect: bool,
    /// Upper bound on one subscribe attempt
    pub connect_timeout: Duration,
    pub backoff: ReconnectConfig,
}

impl Default for PushFeedConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            connect_timeout: Duration::from_secs(10),
            backoff: ReconnectConfig::default(),
        }
    }
}

/// Why forwarding from an open subscription stopped
enum StreamEnd {
    Cancelled,
    ReceiverGone,
    Failed(FeedError),
}

/// Forward inserted rows until cancelled
pub async fn run_push_feed(
    source: Arc<dyn ChangeSource>,
    tx: mpsc::Sender<Reading>,
    config: PushFeedConfig,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
) {
    info!("Push feed started");
    let mut delay = config.backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(config.connect_timeout, source.subscribe()) => result,
        };

        match subscribed {
            Ok(Ok(mut stream)) => {
                info!("Push subscription established (attempt {})", attempt);
                delay = config.backoff.initial_delay;
                attempt = 0;

                match forward(stream.as_mut(), &tx, &cancel).await {
                    StreamEnd::Cancelled | StreamEnd::ReceiverGone => {
                        stream.close().await;
                        break;
                    }
                    StreamEnd::Failed(e) => {
                        error!("Push subscription lost: {}", e);
                        stats.record_feed_failure();
                    }
                }
            }
            Ok(Err(e)) => {
                error!("Push subscription failed (attempt {}): {}", attempt, e);
                stats.record_feed_failure();
            }
            Err(_) => {
                error!(
                    "Push subscription timed out after {:?} (attempt {})",
                    config.connect_timeout, attempt
                );
                stats.record_feed_failure();
            }
        }

        if !config.reconnect {
            warn!("Push feed reconnect disabled, no further inserts will arrive");
            cancel.cancelled().await;
            break;
        }

        info!("Reconnecting push feed in {:?}", delay);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, &config.backoff);
    }

    info!("Push feed stopped");
}

async fn forward(
    stream: &mut dyn ChangeStream,
    tx: &mpsc::Sender<Reading>,
    cancel: &CancellationToken,
) -> StreamEnd {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = stream.next_record() => next,
        };

        let record = match next {
            Ok(record) => record,
            Err(e) => return StreamEnd::Failed(e),
        };

        match record.into_reading(FeedKind::Push) {
            Ok(reading) => {
                debug!("Push feed received reading {}", reading.id);
                if tx.send(reading).await.is_err() {
                    return StreamEnd::ReceiverGone;
                }
            }
            Err(e) => warn!("Skipping undecodable pushed record: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoredReading;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn record(id: &str) -> StoredReading {
        serde_json::from_value(json!({
            "id": id,
            "heart_rate": 70,
            "spo2": 97,
            "air_quality": 40,
            "timestamp": "2024-05-01T12:00:00Z"
        }))
        .unwrap()
    }

    /// Yields queued records, then closes or idles
    struct ScriptedStream {
        records: VecDeque<StoredReading>,
        close_when_empty: bool,
        closed: Arc<AtomicBool>,
    }

    impl ChangeStream for ScriptedStream {
        fn next_record<'a>(
            &'a mut self,
        ) -> Pin<Box<dyn Future<Output = Result<StoredReading, FeedError>> + Send + 'a>> {
            Box::pin(async move {
                match self.records.pop_front() {
                    Some(record) => Ok(record),
                    None if self.close_when_empty => Err(FeedError::SubscriptionClosed),
                    None => std::future::pending().await,
                }
            })
        }

        fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
            })
        }
    }

    /// Fails the first `failures` subscribes, then hands out scripted streams
    struct ScriptedSource {
        failures: u32,
        attempts: AtomicU32,
        records: Vec<StoredReading>,
        close_when_empty: bool,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(failures: u32, records: Vec<StoredReading>, close_when_empty: bool) -> Self {
            Self {
                failures,
                attempts: AtomicU32::new(0),
                records,
                close_when_empty,
                closed: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl ChangeSource for ScriptedSource {
        fn subscribe<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, FeedError>> + Send + 'a>>
        {
            Box::pin(async move {
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
                if attempt < self.failures {
                    return Err(FeedError::SubscriptionFailed("refused".to_string()));
                }
                Ok(Box::new(ScriptedStream {
                    records: self.records.iter().cloned().collect(),
                    close_when_empty: self.close_when_empty,
                    closed: self.closed.clone(),
                }) as Box<dyn ChangeStream>)
            })
        }
    }

    fn fast_config(reconnect: bool) -> PushFeedConfig {
        PushFeedConfig {
            reconnect,
            connect_timeout: Duration::from_secs(1),
            backoff: ReconnectConfig {
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
            },
        }
    }

    #[test]
    fn test_next_delay_doubles() {
        let config = ReconnectConfig::default();
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn test_next_delay_clamps_at_max() {
        let config = ReconnectConfig::default();
        assert_eq!(next_delay(Duration::from_secs(20), &config), Duration::from_secs(30));
        assert_eq!(next_delay(Duration::from_secs(30), &config), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_forwards_pushed_records() {
        let source = Arc::new(ScriptedSource::new(0, vec![record("a"), record("b")], false));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let stats = Arc::new(EngineStats::new());

        let handle = tokio::spawn(run_push_feed(
            source.clone(),
            tx,
            fast_config(true),
            stats,
            cancel.clone(),
        ));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(second.id, "b");
        assert_eq!(first.origin, FeedKind::Push);

        cancel.cancel();
        handle.await.unwrap();
        assert!(source.closed.load(Ordering::SeqCst), "subscription was not closed");
    }

    #[tokio::test]
    async fn test_reconnects_after_failures() {
        let source = Arc::new(ScriptedSource::new(2, vec![record("late")], false));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let stats = Arc::new(EngineStats::new());

        let handle = tokio::spawn(run_push_feed(
            source.clone(),
            tx,
            fast_config(true),
            stats.clone(),
            cancel.clone(),
        ));

        let reading = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reading.id, "late");
        assert_eq!(source.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().feed_failures, 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_subscription_drops() {
        let source = Arc::new(ScriptedSource::new(0, vec![record("x")], true));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_push_feed(
            source.clone(),
            tx,
            fast_config(true),
            Arc::new(EngineStats::new()),
            cancel.clone(),
        ));

        // Each reconnect replays the scripted record
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(source.attempts.load(Ordering::SeqCst) >= 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stalls_without_reconnect() {
        let source = Arc::new(ScriptedSource::new(5, Vec::new(), false));
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_push_feed(
            source.clone(),
            tx,
            fast_config(false),
            Arc::new(EngineStats::new()),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_record_is_skipped() {
        let bad: StoredReading = serde_json::from_value(json!({
            "id": "bad",
            "heart_rate": "fast",
            "spo2": 97,
            "air_quality": 40,
            "timestamp": "2024-05-01T12:00:00Z"
        }))
        .unwrap();
        let source = Arc::new(ScriptedSource::new(0, vec![bad, record("good")], false));
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_push_feed(
            source,
            tx,
            fast_config(true),
            Arc::new(EngineStats::new()),
            cancel.clone(),
        ));

        assert_eq!(rx.recv().await.unwrap().id, "good");

        cancel.cancel();
        handle.await.unwrap();
    }
}
