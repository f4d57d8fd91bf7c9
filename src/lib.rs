/// Error types for feeds, persistence, configuration and readings
pub mod error;

/// Reading, metric and severity types
pub mod events;

/// Rolling buffer and the reading aggregator
pub mod aggregator;

/// Threshold rules, the alert evaluator and the alert feed
pub mod alerts;

/// Push, poll and synthetic reading producers
pub mod feeds;

/// Backend REST and Realtime clients
pub mod store;

/// Best-effort persistence queue and worker
pub mod persistence;

/// Single-consumer ingest loop and dashboard snapshots
pub mod engine;

/// Session lifecycle wiring every task together
pub mod session;

/// One-shot location lookup
pub mod location;

/// Self-monitoring counters
pub mod monitoring;

/// Configuration management
pub mod config;

// Re-export commonly used types
pub use error::{ConfigError, FeedError, LocationError, PersistenceError, ReadingError};
pub use events::{FeedKind, Metric, Reading, Severity, Timestamp};
