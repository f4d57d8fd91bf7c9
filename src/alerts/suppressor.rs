use crate::alerts::Alert;
use crate::events::{Metric, Timestamp};
use chrono::Duration;
use log::debug;
use std::collections::HashMap;

/// Suppresses repeats of the same alert condition within a cooldown window
///
/// Keys are `(metric, category)`. With a zero cooldown every alert passes,
/// so a reading that stays past a threshold re-alerts on every tick.
#[derive(Debug)]
pub struct RepeatSuppressor {
    cooldown: Duration,
    last_emitted: HashMap<(Metric, String), Timestamp>,
}

impl Default for RepeatSuppressor {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

impl RepeatSuppressor {
    /// Create a suppressor with the given cooldown window
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_emitted: HashMap::new(),
        }
    }

    /// Whether suppression is active
    pub fn is_enabled(&self) -> bool {
        self.cooldown > Duration::zero()
    }

    /// Keep only alerts whose condition has not fired within the cooldown
    pub fn filter(&mut self, alerts: Vec<Alert>) -> Vec<Alert> {
        if !self.is_enabled() {
            return alerts;
        }

        alerts
            .into_iter()
            .filter(|alert| self.allow(alert))
            .collect()
    }

    /// Check and record a single alert
    fn allow(&mut self, alert: &Alert) -> bool {
        let now = alert.emitted_at;
        self.cleanup_expired(now);

        let key = (alert.metric, alert.category.clone());
        if let Some(last) = self.last_emitted.get(&key) {
            if now - *last < self.cooldown {
                debug!("Suppressing repeated alert: {}", alert.message);
                return false;
            }
        }

        self.last_emitted.insert(key, now);
        true
    }

    /// Drop entries whose cooldown has elapsed
    fn cleanup_expired(&mut self, now: Timestamp) {
        let cooldown = self.cooldown;
        self.last_emitted.retain(|_, last| now - *last < cooldown);
    }

    /// Number of conditions currently inside their cooldown
    pub fn tracked_count(&self) -> usize {
        self.last_emitted.len()
    }
}
