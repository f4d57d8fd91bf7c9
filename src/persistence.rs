//! Best-effort persistence of locally generated readings
//!
//! The aggregator never awaits a write. It hands a [`PersistJob`] to a
//! [`PersistenceSink`], which enqueues with `try_send`; a full queue sheds
//! the job. A single worker task drains the queue and calls the
//! [`PersistenceGateway`] with a timeout per write.

use crate::error::PersistenceError;
use crate::events::Reading;
use crate::monitoring::EngineStats;
use log::{debug, error, info, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Trait for durable-store writers
pub trait PersistenceGateway: Send + Sync {
    fn save<'a>(
        &'a self,
        user_id: &'a str,
        reading: &'a Reading,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistenceError>> + Send + 'a>>;
}

/// One pending write
#[derive(Debug, Clone)]
pub struct PersistJob {
    pub user_id: String,
    pub reading: Reading,
}

/// Non-blocking producer side of the persistence queue
#[derive(Clone)]
pub struct PersistenceSink {
    tx: mpsc::Sender<PersistJob>,
    stats: Arc<EngineStats>,
}

impl PersistenceSink {
    /// Create a sink and the receiver the worker drains
    pub fn channel(
        capacity: usize,
        stats: Arc<EngineStats>,
    ) -> (Self, mpsc::Receiver<PersistJob>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, stats }, rx)
    }

    /// Enqueue a write without waiting
    ///
    /// Returns `false` when the job was shed, either because the queue is
    /// full or because the worker has stopped.
    pub fn submit(&self, user_id: &str, reading: &Reading) -> bool {
        let job = PersistJob {
            user_id: user_id.to_string(),
            reading: reading.clone(),
        };

        match self.tx.try_send(job) {
            Ok(()) => {
                self.stats.record_persistence_submitted();
                true
            }
            Err(TrySendError::Full(job)) => {
                warn!(
                    "Persistence queue full, shedding reading {}",
                    job.reading.id
                );
                self.stats.record_persistence_shed();
                false
            }
            Err(TrySendError::Closed(job)) => {
                debug!(
                    "Persistence worker stopped, dropping reading {}",
                    job.reading.id
                );
                self.stats.record_persistence_shed();
                false
            }
        }
    }
}

/// Drain the queue until cancelled or every sink is dropped
pub async fn run_worker(
    gateway: Arc<dyn PersistenceGateway>,
    mut rx: mpsc::Receiver<PersistJob>,
    write_timeout: Duration,
    stats: Arc<EngineStats>,
    cancel: CancellationToken,
) {
    info!("Persistence worker started");

    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        match write_one(gateway.as_ref(), &job, write_timeout).await {
            Ok(()) => {
                debug!("Persisted reading {}", job.reading.id);
                stats.record_persistence_written();
            }
            Err(e) => {
                error!("Failed to persist reading {}: {}", job.reading.id, e);
                stats.record_persistence_failed();
            }
        }
    }

    info!("Persistence worker stopped");
}

async fn write_one(
    gateway: &dyn PersistenceGateway,
    job: &PersistJob,
    write_timeout: Duration,
) -> Result<(), PersistenceError> {
    match tokio::time::timeout(write_timeout, gateway.save(&job.user_id, &job.reading)).await {
        Ok(result) => result,
        Err(_) => Err(PersistenceError::Timeout(write_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FeedKind;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records every save; optionally fails or stalls
    struct RecordingGateway {
        saved: Mutex<Vec<(String, String)>>,
        fail: bool,
        delay: Duration,
    }

    impl RecordingGateway {
        fn new() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
                fail: false,
                delay: Duration::ZERO,
            }
        }

        fn saved_ids(&self) -> Vec<String> {
            self.saved
                .lock()
                .unwrap()
                .iter()
                .map(|(_, id)| id.clone())
                .collect()
        }
    }

    impl PersistenceGateway for RecordingGateway {
        fn save<'a>(
            &'a self,
            user_id: &'a str,
            reading: &'a Reading,
        ) -> Pin<Box<dyn Future<Output = Result<(), PersistenceError>> + Send + 'a>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.fail {
                    return Err(PersistenceError::WriteFailed("store offline".to_string()));
                }
                self.saved
                    .lock()
                    .unwrap()
                    .push((user_id.to_string(), reading.id.clone()));
                Ok(())
            })
        }
    }

    fn reading(id: &str) -> Reading {
        Reading::new(id, Utc::now(), 80.0, 97.0, 30.0, FeedKind::Synthetic)
    }

    #[test]
    fn test_full_queue_sheds_without_blocking() {
        let stats = Arc::new(EngineStats::new());
        let (sink, _rx) = PersistenceSink::channel(2, stats.clone());

        assert!(sink.submit("user-1", &reading("a")));
        assert!(sink.submit("user-1", &reading("b")));
        assert!(!sink.submit("user-1", &reading("c")));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.persistence_submitted, 2);
        assert_eq!(snapshot.persistence_shed, 1);
    }

    #[test]
    fn test_closed_queue_sheds() {
        let stats = Arc::new(EngineStats::new());
        let (sink, rx) = PersistenceSink::channel(2, stats.clone());
        drop(rx);

        assert!(!sink.submit("user-1", &reading("a")));
        assert_eq!(stats.snapshot().persistence_shed, 1);
    }

    #[tokio::test]
    async fn test_worker_writes_queued_jobs() {
        let stats = Arc::new(EngineStats::new());
        let gateway = Arc::new(RecordingGateway::new());
        let (sink, rx) = PersistenceSink::channel(8, stats.clone());

        sink.submit("user-1", &reading("a"));
        sink.submit("user-1", &reading("b"));
        drop(sink);

        run_worker(
            gateway.clone(),
            rx,
            Duration::from_secs(1),
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(gateway.saved_ids(), vec!["a", "b"]);
        assert_eq!(stats.snapshot().persistence_written, 2);
    }

    #[tokio::test]
    async fn test_worker_counts_failures() {
        let stats = Arc::new(EngineStats::new());
        let gateway = Arc::new(RecordingGateway {
            fail: true,
            ..RecordingGateway::new()
        });
        let (sink, rx) = PersistenceSink::channel(8, stats.clone());
        sink.submit("user-1", &reading("a"));
        drop(sink);

        run_worker(
            gateway,
            rx,
            Duration::from_secs(1),
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.persistence_failed, 1);
        assert_eq!(snapshot.persistence_written, 0);
    }

    #[tokio::test]
    async fn test_worker_times_out_slow_writes() {
        let stats = Arc::new(EngineStats::new());
        let gateway = Arc::new(RecordingGateway {
            delay: Duration::from_millis(200),
            ..RecordingGateway::new()
        });
        let (sink, rx) = PersistenceSink::channel(8, stats.clone());
        sink.submit("user-1", &reading("slow"));
        drop(sink);

        run_worker(
            gateway.clone(),
            rx,
            Duration::from_millis(20),
            stats.clone(),
            CancellationToken::new(),
        )
        .await;

        assert!(gateway.saved_ids().is_empty());
        assert_eq!(stats.snapshot().persistence_failed, 1);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let stats = Arc::new(EngineStats::new());
        let gateway = Arc::new(RecordingGateway::new());
        let (_sink, rx) = PersistenceSink::channel(8, stats.clone());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_worker(
            gateway,
            rx,
            Duration::from_secs(1),
            stats,
            cancel.clone(),
        ));

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "worker did not stop after cancellation");
    }
}
