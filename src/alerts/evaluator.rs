use crate::alerts::rules::{
    AirQualityRule, Condition, HeartRateRule, Spo2Rule, TemperatureRule, Thresholds,
};
use crate::events::{Metric, Reading, Severity, Timestamp};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

/// Rule engine that maps a reading to zero or more alerts
///
/// The evaluator keeps no state between calls: the same reading always
/// produces the same conditions.
pub struct AlertEvaluator {
    rules: Vec<Box<dyn AlertRule>>,
}

/// Trait for rules that inspect a single reading
pub trait AlertRule: Send + Sync {
    /// Return the condition this reading triggers, if any
    fn check(&self, reading: &Reading) -> Option<Condition>;

    /// Get a human-readable name for this rule
    fn name(&self) -> &str;

    /// Metric this rule watches
    fn metric(&self) -> Metric;
}

/// A threshold crossing derived from one reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub severity: Severity,
    pub metric: Metric,
    /// Category such as "Bradycardia" or "Hazardous"
    pub category: String,
    /// Human-readable text embedding the value and the source timestamp
    pub message: String,
    /// Timestamp of the reading that triggered the alert
    pub observed_at: Timestamp,
    /// When the alert was created
    pub emitted_at: Timestamp,
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::with_thresholds(Thresholds::default())
    }
}

impl AlertEvaluator {
    /// Create an evaluator with no rules
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create an evaluator with the built-in rule set for `thresholds`
    pub fn with_thresholds(thresholds: Thresholds) -> Self {
        let mut evaluator = Self::new();
        evaluator.add_rule(Box::new(HeartRateRule::new(
            thresholds.heart_rate_low,
            thresholds.heart_rate_high,
        )));
        evaluator.add_rule(Box::new(Spo2Rule {
            low: thresholds.spo2_low,
        }));
        evaluator.add_rule(Box::new(AirQualityRule {
            high: thresholds.air_quality_high,
        }));
        evaluator.add_rule(Box::new(TemperatureRule {
            high: thresholds.temperature_high,
        }));
        evaluator
    }

    /// Add a rule to the evaluator
    pub fn add_rule(&mut self, rule: Box<dyn AlertRule>) {
        self.rules.push(rule);
    }

    /// Get the number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate a reading, stamping alerts with the current time
    pub fn evaluate(&self, reading: &Reading) -> Vec<Alert> {
        self.evaluate_at(reading, Utc::now())
    }

    /// Evaluate a reading with an explicit emission time
    ///
    /// Alerts are returned in rule order.
    pub fn evaluate_at(&self, reading: &Reading, emitted_at: Timestamp) -> Vec<Alert> {
        let time = reading.observed_at.format("%H:%M:%S");

        self.rules
            .iter()
            .filter_map(|rule| {
                let condition = rule.check(reading)?;
                debug!("{} raised {} for reading {}", rule.name(), condition.category, reading.id);
                Some(Alert {
                    severity: condition.severity,
                    metric: rule.metric(),
                    message: format!("{} ({}) at {}", condition.title, condition.detail, time),
                    category: condition.category,
                    observed_at: reading.observed_at,
                    emitted_at,
                })
            })
            .collect()
    }
}
