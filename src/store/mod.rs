/// Backend client: REST reads and writes, Realtime insert notifications
pub mod realtime;
pub mod record;
pub mod rest;

pub use realtime::{RealtimeSource, RealtimeStream};
pub use record::{InsertRow, StoredReading};
pub use rest::RestStore;

use crate::error::{ConfigError, FeedError};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

pub const ENV_BACKEND_URL: &str = "VITALWATCH_BACKEND_URL";
pub const ENV_BACKEND_KEY: &str = "VITALWATCH_BACKEND_KEY";
pub const ENV_USER_ID: &str = "VITALWATCH_USER_ID";

/// Trait for stores that can return the most recent readings
pub trait ReadingStore: Send + Sync {
    /// Fetch up to `limit` rows ordered by timestamp, newest first
    fn fetch_recent<'a>(
        &'a self,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StoredReading>, FeedError>> + Send + 'a>>;
}

/// Trait for sources of insert notifications
pub trait ChangeSource: Send + Sync {
    /// Open a subscription; resolves once the server confirms it
    fn subscribe<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChangeStream>, FeedError>> + Send + 'a>>;
}

/// An open subscription
pub trait ChangeStream: Send {
    /// Wait for the next inserted row
    ///
    /// Returns `FeedError::SubscriptionClosed` once the server ends the
    /// subscription.
    fn next_record<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<StoredReading, FeedError>> + Send + 'a>>;

    /// Unsubscribe and close the connection
    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Backend location and API key, read from the environment
#[derive(Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub url: String,
    pub key: String,
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl BackendCredentials {
    /// Read credentials from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through an arbitrary lookup
    ///
    /// Empty values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };

        Ok(Self {
            url: read(ENV_BACKEND_URL)?,
            key: read(ENV_BACKEND_KEY)?,
        })
    }
}

/// Optional user id from the environment
pub fn user_id_from_env() -> Option<String> {
    std::env::var(ENV_USER_ID)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
