//! Wire form of a persisted reading
//!
//! The store returns `numeric` columns as JSON strings and may hand back
//! integer ids, so decoding accepts either representation. Conversion into
//! a [`Reading`] happens in [`StoredReading::into_reading`].

use crate::error::ReadingError;
use crate::events::{FeedKind, Reading, Timestamp};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A JSON value that is either a number or a numeric string
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FlexNumber {
    Number(f64),
    Text(String),
}

impl FlexNumber {
    fn to_f64(&self, field: &'static str) -> Result<f64, ReadingError> {
        match self {
            FlexNumber::Number(value) => Ok(*value),
            FlexNumber::Text(raw) => raw.trim().parse().map_err(|_| ReadingError::NotNumeric {
                field,
                raw: raw.clone(),
            }),
        }
    }
}

/// Row identifier as string or integer
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RecordId {
    Text(String),
    Integer(i64),
}

impl RecordId {
    fn into_string(self) -> String {
        match self {
            RecordId::Text(id) => id,
            RecordId::Integer(id) => id.to_string(),
        }
    }
}

/// One row of the readings table as decoded from the backend
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StoredReading {
    pub id: Option<RecordId>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub heart_rate: Option<FlexNumber>,
    pub spo2: Option<FlexNumber>,
    pub air_quality: Option<FlexNumber>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub temperature_c: Option<FlexNumber>,
    #[serde(default)]
    pub humidity_pct: Option<FlexNumber>,
    #[serde(default)]
    pub respiratory_rate: Option<FlexNumber>,
}

impl StoredReading {
    /// Convert into a [`Reading`] tagged with `origin`
    ///
    /// Finiteness is not checked here; the aggregator rejects non-finite
    /// values on ingest.
    ///
    /// # Errors
    ///
    /// Returns `MissingField` when a required column is absent and
    /// `NotNumeric` when a numeric column cannot be parsed.
    pub fn into_reading(self, origin: FeedKind) -> Result<Reading, ReadingError> {
        let id = self
            .id
            .ok_or(ReadingError::MissingField("id"))?
            .into_string();
        let observed_at = parse_timestamp(
            self.timestamp
                .as_deref()
                .ok_or(ReadingError::MissingField("timestamp"))?,
        )?;

        let heart_rate = required(&self.heart_rate, "heart_rate")?;
        let spo2 = required(&self.spo2, "spo2")?;
        let air_quality = required(&self.air_quality, "air_quality")?;

        let mut reading = Reading::new(id, observed_at, heart_rate, spo2, air_quality, origin);
        reading.temperature_c = optional(&self.temperature_c, "temperature_c")?;
        reading.humidity_pct = optional(&self.humidity_pct, "humidity_pct")?;
        reading.respiratory_rate = optional(&self.respiratory_rate, "respiratory_rate")?;
        Ok(reading)
    }
}

fn required(value: &Option<FlexNumber>, field: &'static str) -> Result<f64, ReadingError> {
    value
        .as_ref()
        .ok_or(ReadingError::MissingField(field))?
        .to_f64(field)
}

fn optional(value: &Option<FlexNumber>, field: &'static str) -> Result<Option<f64>, ReadingError> {
    value.as_ref().map(|v| v.to_f64(field)).transpose()
}

/// Parse RFC 3339, or a zone-less timestamp interpreted as UTC
fn parse_timestamp(raw: &str) -> Result<Timestamp, ReadingError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ReadingError::NotNumeric {
            field: "timestamp",
            raw: raw.to_string(),
        })
}

/// Row body for an insert
#[derive(Debug, Serialize)]
pub struct InsertRow<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub heart_rate: f64,
    pub spo2: f64,
    pub air_quality: f64,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respiratory_rate: Option<f64>,
}

impl<'a> InsertRow<'a> {
    /// Borrow a reading as an insert row
    ///
    /// The reading id is sent along so the push echo of this insert is
    /// recognised as a duplicate.
    pub fn new(user_id: &'a str, reading: &'a Reading) -> Self {
        Self {
            id: &reading.id,
            user_id,
            heart_rate: reading.heart_rate,
            spo2: reading.spo2,
            air_quality: reading.air_quality,
            timestamp: reading.observed_at,
            temperature_c: reading.temperature_c,
            humidity_pct: reading.humidity_pct,
            respiratory_rate: reading.respiratory_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> StoredReading {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_decodes_numeric_strings() {
        let record = decode(json!({
            "id": "abc",
            "user_id": "user-1",
            "heart_rate": "72.5",
            "spo2": "97.0",
            "air_quality": 41,
            "timestamp": "2024-05-01T12:00:05+00:00"
        }));

        let reading = record.into_reading(FeedKind::Poll).unwrap();
        assert_eq!(reading.id, "abc");
        assert_eq!(reading.heart_rate, 72.5);
        assert_eq!(reading.spo2, 97.0);
        assert_eq!(reading.air_quality, 41.0);
        assert_eq!(reading.origin, FeedKind::Poll);
        assert_eq!(
            reading.observed_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap()
        );
    }

    #[test]
    fn test_decodes_integer_id_and_naive_timestamp() {
        let record = decode(json!({
            "id": 42,
            "heart_rate": 80,
            "spo2": 95,
            "air_quality": 60,
            "timestamp": "2024-05-01T12:00:05.250"
        }));

        let reading = record.into_reading(FeedKind::Push).unwrap();
        assert_eq!(reading.id, "42");
        assert_eq!(reading.observed_at.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_optional_fields() {
        let record = decode(json!({
            "id": "x",
            "heart_rate": 70,
            "spo2": 98,
            "air_quality": 20,
            "timestamp": "2024-05-01T12:00:00Z",
            "temperature_c": "37.2",
            "respiratory_rate": null
        }));

        let reading = record.into_reading(FeedKind::Poll).unwrap();
        assert_eq!(reading.temperature_c, Some(37.2));
        assert_eq!(reading.humidity_pct, None);
        assert_eq!(reading.respiratory_rate, None);
    }

    #[test]
    fn test_missing_field_is_reported() {
        let record = decode(json!({
            "id": "x",
            "heart_rate": 70,
            "air_quality": 20,
            "timestamp": "2024-05-01T12:00:00Z"
        }));

        assert_eq!(
            record.into_reading(FeedKind::Poll),
            Err(ReadingError::MissingField("spo2"))
        );
    }

    #[test]
    fn test_non_numeric_string_is_reported() {
        let record = decode(json!({
            "id": "x",
            "heart_rate": "fast",
            "spo2": 98,
            "air_quality": 20,
            "timestamp": "2024-05-01T12:00:00Z"
        }));

        match record.into_reading(FeedKind::Poll) {
            Err(ReadingError::NotNumeric { field, raw }) => {
                assert_eq!(field, "heart_rate");
                assert_eq!(raw, "fast");
            }
            other => panic!("Expected NotNumeric, got {:?}", other),
        }
    }

    #[test]
    fn test_nan_string_decodes_and_fails_validation() {
        let record = decode(json!({
            "id": "x",
            "heart_rate": "NaN",
            "spo2": 98,
            "air_quality": 20,
            "timestamp": "2024-05-01T12:00:00Z"
        }));

        let reading = record.into_reading(FeedKind::Poll).unwrap();
        assert!(reading.validate().is_err());
    }

    #[test]
    fn test_insert_row_serialization() {
        let reading = Reading::new(
            "sim-1",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            72.0,
            97.0,
            40.0,
            FeedKind::Synthetic,
        )
        .with_temperature(36.9);

        let value = serde_json::to_value(InsertRow::new("user-1", &reading)).unwrap();
        assert_eq!(value["id"], "sim-1");
        assert_eq!(value["user_id"], "user-1");
        assert_eq!(value["heart_rate"], 72.0);
        assert_eq!(value["temperature_c"], 36.9);
        assert!(value.get("humidity_pct").is_none());
    }
}
