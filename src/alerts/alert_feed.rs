use crate::alerts::Alert;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Where newly appended alerts are placed in the feed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertOrder {
    /// Newest alert at index 0
    #[default]
    NewestFirst,
    /// Newest alert at the end
    NewestLast,
}

/// Bounded, ordered holder of emitted alerts
///
/// Whatever the ordering convention, eviction always drops the oldest
/// alerts once the feed is over capacity.
#[derive(Debug, Clone)]
pub struct AlertFeed {
    alerts: VecDeque<Alert>,
    capacity: usize,
    order: AlertOrder,
}

impl Default for AlertFeed {
    fn default() -> Self {
        Self::new(5, AlertOrder::NewestFirst)
    }
}

impl AlertFeed {
    /// Create an empty feed
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of alerts retained
    /// * `order` - Placement convention for new alerts
    pub fn new(capacity: usize, order: AlertOrder) -> Self {
        Self {
            alerts: VecDeque::with_capacity(capacity),
            capacity,
            order,
        }
    }

    /// Insert a batch of alerts and truncate to capacity
    ///
    /// A batch keeps its internal order relative to the convention: with
    /// `NewestFirst` the whole batch lands ahead of older alerts. Alerts in
    /// one batch share an age, so a batch larger than the feed keeps its
    /// first `capacity` alerts under either order.
    pub fn append(&mut self, mut alerts: Vec<Alert>) {
        if alerts.is_empty() {
            return;
        }
        alerts.truncate(self.capacity);

        match self.order {
            AlertOrder::NewestFirst => {
                for alert in alerts.into_iter().rev() {
                    self.alerts.push_front(alert);
                }
                while self.alerts.len() > self.capacity {
                    self.alerts.pop_back();
                }
            }
            AlertOrder::NewestLast => {
                self.alerts.extend(alerts);
                while self.alerts.len() > self.capacity {
                    self.alerts.pop_front();
                }
            }
        }

        debug!("Alert feed now holds {} alerts", self.alerts.len());
    }

    /// Remove every alert
    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    /// Copy of the current alerts in display order
    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    /// Number of alerts held
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Whether the feed holds no alerts
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Maximum number of alerts retained
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Placement convention for new alerts
    pub fn order(&self) -> AlertOrder {
        self.order
    }
}
