//! Session lifecycle
//!
//! A [`Session`] starts the ingest engine, every enabled feed, the
//! persistence worker and the location lookup under one cancellation
//! token, and [`Session::shutdown`] stops and joins all of them.

use crate::aggregator::Aggregator;
use crate::alerts::{AlertEvaluator, AlertFeed, RepeatSuppressor};
use crate::config::{Config, LocationSource, Mode};
use crate::engine::{EngineHandle, TelemetryEngine};
use crate::error::ConfigError;
use crate::events::FeedKind;
use crate::feeds::{run_poll_feed, run_push_feed, run_synthetic_feed, FeedSet, SyntheticGenerator};
use crate::location::{self, FixedLocation, HttpLocationProvider, Location, LocationProvider};
use crate::monitoring::{EngineStats, StatsSnapshot};
use crate::persistence::{self, PersistenceGateway, PersistenceSink};
use crate::store::{BackendCredentials, ChangeSource, ReadingStore, RealtimeSource, RestStore};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// External collaborators a session talks to
///
/// Any of them may be absent; the matching feed or worker is then skipped.
#[derive(Default)]
pub struct Backends {
    pub store: Option<Arc<dyn ReadingStore>>,
    pub changes: Option<Arc<dyn ChangeSource>>,
    pub gateway: Option<Arc<dyn PersistenceGateway>>,
    pub location: Option<Box<dyn LocationProvider>>,
}

impl Backends {
    /// Build the real backend clients for `mode`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnv` when a live feed is enabled but no
    /// credentials were supplied.
    pub fn from_config(
        config: &Config,
        mode: Mode,
        credentials: Option<BackendCredentials>,
        user_id: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let mut backends = Backends {
            location: location_provider(config),
            ..Backends::default()
        };

        let credentials = match credentials {
            Some(credentials) => credentials,
            None if config.requires_backend(mode) => {
                return Err(ConfigError::MissingEnv(crate::store::ENV_BACKEND_URL))
            }
            None => {
                info!("No backend credentials, running without the durable store");
                return Ok(backends);
            }
        };

        let rest = Arc::new(
            RestStore::new(
                credentials.clone(),
                config.backend.schema.clone(),
                config.backend.table.clone(),
                Duration::from_secs(config.backend.request_timeout_secs),
            )
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?
            .with_user_id(user_id.map(str::to_string)),
        );

        if config.poll_enabled(mode) {
            backends.store = Some(rest.clone());
        }
        if config.push_enabled(mode) {
            backends.changes = Some(Arc::new(RealtimeSource::new(
                credentials,
                config.backend.schema.clone(),
                config.backend.table.clone(),
                Duration::from_secs(config.push.heartbeat_interval_secs),
            )));
        }
        if config.persistence.enabled {
            backends.gateway = Some(rest);
        }

        Ok(backends)
    }
}

fn location_provider(config: &Config) -> Option<Box<dyn LocationProvider>> {
    let settings = &config.location;
    match settings.provider {
        LocationSource::None => None,
        LocationSource::Fixed => match (settings.latitude, settings.longitude) {
            (Some(latitude), Some(longitude)) => Some(Box::new(FixedLocation {
                latitude,
                longitude,
            })),
            _ => None,
        },
        LocationSource::Http => {
            let url = settings.url.clone()?;
            match HttpLocationProvider::new(url, Duration::from_secs(settings.timeout_secs)) {
                Ok(provider) => Some(Box::new(provider)),
                Err(e) => {
                    warn!("Location provider unavailable: {}", e);
                    None
                }
            }
        }
    }
}

/// A running set of feeds, engine and workers
pub struct Session {
    mode: Mode,
    cancel: CancellationToken,
    handle: EngineHandle,
    stats: Arc<EngineStats>,
    feeds: FeedSet,
    engine_task: JoinHandle<()>,
    worker_task: Option<JoinHandle<()>>,
    location_task: JoinHandle<()>,
    location: watch::Receiver<Option<Location>>,
}

impl Session {
    /// Start a session against the real backend
    ///
    /// Credentials come from the environment; they are only mandatory
    /// when a live feed is enabled for `mode`.
    pub fn start(config: &Config, mode: Mode, user_id: Option<String>) -> Result<Self, ConfigError> {
        let credentials = match BackendCredentials::from_env() {
            Ok(credentials) => Some(credentials),
            Err(e) if config.requires_backend(mode) => return Err(e),
            Err(_) => None,
        };
        let backends = Backends::from_config(config, mode, credentials, user_id.as_deref())?;
        Ok(Self::start_with(config, mode, user_id, backends))
    }

    /// Start a session with the given collaborators
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_with(
        config: &Config,
        mode: Mode,
        user_id: Option<String>,
        backends: Backends,
    ) -> Self {
        info!("Starting {:?} session", mode);
        let cancel = CancellationToken::new();
        let stats = Arc::new(EngineStats::new());

        let mut aggregator = Aggregator::new(config.buffer_capacity(mode))
            .with_evaluator(AlertEvaluator::with_thresholds(config.thresholds))
            .with_suppressor(RepeatSuppressor::new(config.repeat_cooldown()))
            .with_stats(stats.clone());

        let mut worker_task = None;
        match (&backends.gateway, &user_id) {
            (Some(gateway), Some(user_id)) if config.feeds.synthetic_enabled => {
                let (sink, rx) =
                    PersistenceSink::channel(config.persistence.queue_capacity, stats.clone());
                aggregator = aggregator.with_persistence(sink, user_id.clone());
                worker_task = Some(tokio::spawn(persistence::run_worker(
                    gateway.clone(),
                    rx,
                    Duration::from_secs(config.persistence.write_timeout_secs),
                    stats.clone(),
                    cancel.clone(),
                )));
            }
            (Some(_), None) => info!("No user id, generated readings will not be persisted"),
            _ => {}
        }

        let alerts = AlertFeed::new(config.alerts.capacity, config.alerts.order);
        let (mut engine, handle) =
            TelemetryEngine::new(aggregator, alerts, config.feeds.channel_capacity);
        if let Some(interval) = config.stats_interval() {
            engine = engine.with_stats_interval(interval);
        }
        let engine_task = tokio::spawn(engine.run(cancel.clone()));

        let mut feeds = FeedSet::new(cancel.clone());
        if let Some(changes) = backends.changes {
            feeds.spawn(
                FeedKind::Push,
                run_push_feed(
                    changes,
                    handle.readings.clone(),
                    config.push_feed(),
                    stats.clone(),
                    feeds.token(),
                ),
            );
        }
        if let Some(store) = backends.store {
            feeds.spawn(
                FeedKind::Poll,
                run_poll_feed(
                    store,
                    handle.readings.clone(),
                    config.poll_feed(),
                    stats.clone(),
                    feeds.token(),
                ),
            );
        }
        if config.feeds.synthetic_enabled {
            feeds.spawn(
                FeedKind::Synthetic,
                run_synthetic_feed(
                    SyntheticGenerator::from_os_rng(mode),
                    handle.last_reading.clone(),
                    handle.readings.clone(),
                    config.synthetic_interval(mode),
                    feeds.token(),
                ),
            );
        }
        if feeds.is_empty() {
            warn!("No feeds enabled, the dashboard will stay empty");
        }

        let (location_tx, location_rx) = watch::channel(None);
        let precision = config.location.precision;
        let timeout = Duration::from_secs(config.location.timeout_secs);
        let provider = backends.location;
        let location_cancel = cancel.clone();
        let location_task = tokio::spawn(async move {
            tokio::select! {
                _ = location_cancel.cancelled() => {}
                resolved = location::resolve(provider.as_deref(), precision, timeout) => {
                    location_tx.send_replace(Some(resolved));
                }
            }
        });

        Self {
            mode,
            cancel,
            handle,
            stats,
            feeds,
            engine_task,
            worker_task,
            location_task,
            location: location_rx,
        }
    }

    /// Mode the session was started in
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Channel ends for reading views and sending commands
    pub fn handle(&self) -> &EngineHandle {
        &self.handle
    }

    /// Resolved location; `None` while the lookup is in flight
    pub fn location(&self) -> Option<Location> {
        *self.location.borrow()
    }

    /// Kinds of the running feeds
    pub fn feed_kinds(&self) -> Vec<FeedKind> {
        self.feeds.kinds()
    }

    /// Current counter values
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Token observed by every task of this session
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task and wait for it to finish
    pub async fn shutdown(self) -> StatsSnapshot {
        info!("Shutting down session");
        self.cancel.cancel();
        self.feeds.stop().await;

        if let Err(e) = self.engine_task.await {
            warn!("Engine task ended abnormally: {}", e);
        }
        if let Some(worker) = self.worker_task {
            if let Err(e) = worker.await {
                warn!("Persistence worker ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.location_task.await {
            warn!("Location task ended abnormally: {}", e);
        }

        let stats = self.stats.log_summary();
        info!("Session stopped");
        stats
    }
}
