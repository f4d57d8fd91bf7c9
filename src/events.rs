//! Core reading types shared by feeds, the aggregator and the alert path
//!
//! A [`Reading`] is the single value type that flows from every feed into the
//! aggregator. It is immutable once built; feeds construct it, the aggregator
//! validates and buffers it.

use crate::error::ReadingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Which feed produced a reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    /// Server-initiated insert notification
    Push,
    /// Periodic re-fetch from the durable store
    Poll,
    /// Locally generated reading
    Synthetic,
}

impl FeedKind {
    /// Whether readings from this feed already live in the durable store
    pub fn is_durable(self) -> bool {
        matches!(self, FeedKind::Push | FeedKind::Poll)
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::Push => write!(f, "push"),
            FeedKind::Poll => write!(f, "poll"),
            FeedKind::Synthetic => write!(f, "synthetic"),
        }
    }
}

/// One timestamped set of physiological and environmental measurements
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Opaque unique token, used for deduplication across feeds
    pub id: String,
    /// When the measurement was taken
    pub observed_at: Timestamp,
    /// Heart rate in beats per minute
    pub heart_rate: f64,
    /// Blood oxygen saturation in percent
    pub spo2: f64,
    /// Air quality index
    pub air_quality: f64,
    /// Body temperature in degrees Celsius
    pub temperature_c: Option<f64>,
    /// Relative humidity in percent
    pub humidity_pct: Option<f64>,
    /// Breaths per minute
    pub respiratory_rate: Option<f64>,
    /// Feed that produced this reading
    pub origin: FeedKind,
}

impl Reading {
    /// Create a reading with the three core metrics and no optional fields
    pub fn new(
        id: impl Into<String>,
        observed_at: Timestamp,
        heart_rate: f64,
        spo2: f64,
        air_quality: f64,
        origin: FeedKind,
    ) -> Self {
        Self {
            id: id.into(),
            observed_at,
            heart_rate,
            spo2,
            air_quality,
            temperature_c: None,
            humidity_pct: None,
            respiratory_rate: None,
            origin,
        }
    }

    /// Set the body temperature in degrees Celsius
    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature_c = Some(celsius);
        self
    }

    /// Set the relative humidity in percent
    pub fn with_humidity(mut self, percent: f64) -> Self {
        self.humidity_pct = Some(percent);
        self
    }

    /// Set the respiratory rate in breaths per minute
    pub fn with_respiratory_rate(mut self, breaths_per_minute: f64) -> Self {
        self.respiratory_rate = Some(breaths_per_minute);
        self
    }

    /// Value of a metric, `None` if this reading does not carry it
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::HeartRate => Some(self.heart_rate),
            Metric::Spo2 => Some(self.spo2),
            Metric::AirQuality => Some(self.air_quality),
            Metric::Temperature => self.temperature_c,
            Metric::Humidity => self.humidity_pct,
            Metric::RespiratoryRate => self.respiratory_rate,
        }
    }

    /// Check that every numeric field present is finite
    ///
    /// # Errors
    ///
    /// Returns `ReadingError::Malformed` naming the first offending field.
    pub fn validate(&self) -> Result<(), ReadingError> {
        for metric in Metric::ALL {
            if let Some(value) = self.value(metric) {
                if !value.is_finite() {
                    return Err(ReadingError::Malformed {
                        id: self.id.clone(),
                        field: metric.field_name(),
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}

/// A named measurement carried by a [`Reading`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    Spo2,
    AirQuality,
    Temperature,
    Humidity,
    RespiratoryRate,
}

impl Metric {
    /// Every metric, in display order
    pub const ALL: [Metric; 6] = [
        Metric::HeartRate,
        Metric::Spo2,
        Metric::AirQuality,
        Metric::Temperature,
        Metric::Humidity,
        Metric::RespiratoryRate,
    ];

    /// Field name as used in the persisted schema
    pub fn field_name(self) -> &'static str {
        match self {
            Metric::HeartRate => "heart_rate",
            Metric::Spo2 => "spo2",
            Metric::AirQuality => "air_quality",
            Metric::Temperature => "temperature_c",
            Metric::Humidity => "humidity_pct",
            Metric::RespiratoryRate => "respiratory_rate",
        }
    }

    /// Short label for status output
    pub fn label(self) -> &'static str {
        match self {
            Metric::HeartRate => "HR",
            Metric::Spo2 => "SpO2",
            Metric::AirQuality => "AQI",
            Metric::Temperature => "Temp",
            Metric::Humidity => "Humidity",
            Metric::RespiratoryRate => "Resp",
        }
    }

    /// Unit shown after the value on the dashboard
    pub fn unit(self) -> &'static str {
        match self {
            Metric::HeartRate => "BPM",
            Metric::Spo2 => "%",
            Metric::AirQuality => "AQI",
            Metric::Temperature => "°C",
            Metric::Humidity => "%",
            Metric::RespiratoryRate => "br/min",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Severity level for alerts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, no action required
    Info,
    /// Warning that may require attention
    Warning,
    /// Critical issue requiring immediate attention
    Critical,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Reading {
        Reading::new("r-1", Utc::now(), 72.0, 97.5, 42.0, FeedKind::Poll)
    }

    #[test]
    fn test_reading_serialization() {
        let reading = sample().with_temperature(36.6);

        let json = serde_json::to_string(&reading).unwrap();
        let deserialized: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(reading, deserialized);
    }

    #[test]
    fn test_value_for_optional_metrics() {
        let reading = sample().with_humidity(55.0);
        assert_eq!(reading.value(Metric::HeartRate), Some(72.0));
        assert_eq!(reading.value(Metric::Humidity), Some(55.0));
        assert_eq!(reading.value(Metric::Temperature), None);
        assert_eq!(reading.value(Metric::RespiratoryRate), None);
    }

    #[test]
    fn test_validate_accepts_finite_values() {
        assert!(sample().with_respiratory_rate(16.0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_nan_core_field() {
        let mut reading = sample();
        reading.spo2 = f64::NAN;
        match reading.validate() {
            Err(ReadingError::Malformed { field, .. }) => assert_eq!(field, "spo2"),
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_infinite_optional_field() {
        let reading = sample().with_temperature(f64::INFINITY);
        match reading.validate() {
            Err(ReadingError::Malformed { field, .. }) => assert_eq!(field, "temperature_c"),
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_feed_kind_durability() {
        assert!(FeedKind::Push.is_durable());
        assert!(FeedKind::Poll.is_durable());
        assert!(!FeedKind::Synthetic.is_durable());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
        assert_eq!(
            serde_json::to_string(&Metric::AirQuality).unwrap(),
            "\"air_quality\""
        );
    }
}
