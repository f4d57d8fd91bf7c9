//! Reading producers and their shared lifecycle
//!
//! Every feed runs as its own task and sends readings into one channel.
//! A [`FeedSet`] starts them under a shared cancellation token and tears
//! them all down together.

pub mod poll_feed;
pub mod push_feed;
pub mod synthetic_feed;

pub use poll_feed::{run_poll_feed, PollFeedConfig};
pub use push_feed::{next_delay, run_push_feed, PushFeedConfig, ReconnectConfig};
pub use synthetic_feed::{run_synthetic_feed, SyntheticGenerator};

use crate::events::FeedKind;
use log::{info, warn};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned feed task
pub struct FeedHandle {
    pub kind: FeedKind,
    handle: JoinHandle<()>,
}

/// Group of feed tasks started and stopped as one unit
pub struct FeedSet {
    cancel: CancellationToken,
    feeds: Vec<FeedHandle>,
}

impl FeedSet {
    /// Create an empty set whose feeds observe `cancel`
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            feeds: Vec::new(),
        }
    }

    /// Token the feeds should select on
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn a feed task
    pub fn spawn<F>(&mut self, kind: FeedKind, feed: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Starting {} feed", kind);
        self.feeds.push(FeedHandle {
            kind,
            handle: tokio::spawn(feed),
        });
    }

    /// Kinds of the running feeds, in start order
    pub fn kinds(&self) -> Vec<FeedKind> {
        self.feeds.iter().map(|feed| feed.kind).collect()
    }

    /// Number of running feeds
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Whether no feed was spawned
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Cancel every feed and wait for each task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        for feed in self.feeds {
            if let Err(e) = feed.handle.await {
                warn!("{} feed task ended abnormally: {}", feed.kind, e);
            }
        }
        info!("All feeds stopped");
    }
}
