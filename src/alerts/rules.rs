//! Built-in threshold rules
//!
//! Each rule inspects a single reading and reports at most one condition.
//! Thresholds are carried by [`Thresholds`] so they can be tuned from the
//! configuration file instead of being fixed in code.

use crate::alerts::AlertRule;
use crate::events::{Metric, Reading, Severity};
use serde::{Deserialize, Serialize};

/// Threshold table used to build the default rule set
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Heart rate below this is bradycardia
    pub heart_rate_low: f64,
    /// Heart rate above this is tachycardia
    pub heart_rate_high: f64,
    /// SpO2 below this is severe hypoxia
    pub spo2_low: f64,
    /// AQI above this raises an air quality alert
    pub air_quality_high: f64,
    /// Body temperature above this is elevated
    pub temperature_high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            heart_rate_low: 60.0,
            heart_rate_high: 100.0,
            spo2_low: 90.0,
            air_quality_high: 100.0,
            temperature_high: 38.0,
        }
    }
}

/// A condition detected by a rule
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub severity: Severity,
    /// Short category, e.g. "Bradycardia" or "Very Unhealthy"
    pub category: String,
    /// Headline used in the alert message
    pub title: String,
    /// Value with unit, already formatted
    pub detail: String,
}

/// Air quality band
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthyForSensitiveGroups,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    /// Band for an AQI value; every upper bound is inclusive
    pub fn from_aqi(aqi: f64) -> Self {
        if aqi <= 50.0 {
            AqiCategory::Good
        } else if aqi <= 100.0 {
            AqiCategory::Moderate
        } else if aqi <= 150.0 {
            AqiCategory::UnhealthyForSensitiveGroups
        } else if aqi <= 200.0 {
            AqiCategory::Unhealthy
        } else if aqi <= 300.0 {
            AqiCategory::VeryUnhealthy
        } else {
            AqiCategory::Hazardous
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::UnhealthyForSensitiveGroups => "Unhealthy for Sensitive Groups",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }

    /// Alert severity for a reading in this band
    pub fn severity(self) -> Severity {
        match self {
            AqiCategory::Good | AqiCategory::Moderate => Severity::Info,
            AqiCategory::UnhealthyForSensitiveGroups | AqiCategory::Unhealthy => {
                Severity::Warning
            }
            AqiCategory::VeryUnhealthy | AqiCategory::Hazardous => Severity::Critical,
        }
    }
}

/// Category label for an AQI value
pub fn aqi_category(aqi: f64) -> &'static str {
    AqiCategory::from_aqi(aqi).label()
}

/// Heart rate outside the normal band
///
/// Both bounds are normal; only values strictly below `low` or strictly above
/// `high` raise a condition.
pub struct HeartRateRule {
    pub low: f64,
    pub high: f64,
}

impl HeartRateRule {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }
}

impl AlertRule for HeartRateRule {
    fn check(&self, reading: &Reading) -> Option<Condition> {
        let bpm = reading.heart_rate;
        let category = if bpm < self.low {
            "Bradycardia"
        } else if bpm > self.high {
            "Tachycardia"
        } else {
            return None;
        };

        Some(Condition {
            severity: Severity::Warning,
            category: category.to_string(),
            title: category.to_string(),
            detail: format!("{:.1} BPM", bpm),
        })
    }

    fn name(&self) -> &str {
        "HeartRateRule"
    }

    fn metric(&self) -> Metric {
        Metric::HeartRate
    }
}

/// Blood oxygen below the hypoxia threshold
pub struct Spo2Rule {
    pub low: f64,
}

impl AlertRule for Spo2Rule {
    fn check(&self, reading: &Reading) -> Option<Condition> {
        if reading.spo2 >= self.low {
            return None;
        }

        Some(Condition {
            severity: Severity::Critical,
            category: "Severe Hypoxia".to_string(),
            title: "Severe Hypoxia".to_string(),
            detail: format!("SpO2 {:.1}%", reading.spo2),
        })
    }

    fn name(&self) -> &str {
        "Spo2Rule"
    }

    fn metric(&self) -> Metric {
        Metric::Spo2
    }
}

/// AQI above the configured cutoff, severity scaled by band
pub struct AirQualityRule {
    pub high: f64,
}

impl AlertRule for AirQualityRule {
    fn check(&self, reading: &Reading) -> Option<Condition> {
        let aqi = reading.air_quality;
        if aqi <= self.high {
            return None;
        }

        let band = AqiCategory::from_aqi(aqi);
        Some(Condition {
            severity: band.severity(),
            category: band.label().to_string(),
            title: format!("{} Air Quality", band.label()),
            detail: format!("{:.1} AQI", aqi),
        })
    }

    fn name(&self) -> &str {
        "AirQualityRule"
    }

    fn metric(&self) -> Metric {
        Metric::AirQuality
    }
}

/// Body temperature above the fever threshold; silent when not measured
pub struct TemperatureRule {
    pub high: f64,
}

impl AlertRule for TemperatureRule {
    fn check(&self, reading: &Reading) -> Option<Condition> {
        let celsius = reading.temperature_c?;
        if celsius <= self.high {
            return None;
        }

        Some(Condition {
            severity: Severity::Warning,
            category: "Elevated Temperature".to_string(),
            title: "Elevated Temperature".to_string(),
            detail: format!("{:.1} °C", celsius),
        })
    }

    fn name(&self) -> &str {
        "TemperatureRule"
    }

    fn metric(&self) -> Metric {
        Metric::Temperature
    }
}
