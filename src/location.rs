//! One-shot, best-effort location lookup
//!
//! The location is resolved once per session and never retried. Any
//! failure, or the absence of a provider, yields [`Location::Unavailable`].

use crate::error::LocationError;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Resolved location, rounded for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Location {
    /// Coordinates rounded to `precision` decimal places
    Coordinates {
        latitude: f64,
        longitude: f64,
        precision: u32,
    },
    Unavailable,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Coordinates {
                latitude,
                longitude,
                precision,
            } => {
                let precision = *precision as usize;
                write!(
                    f,
                    "Lat {:.*}, Lon {:.*}",
                    precision, latitude, precision, longitude
                )
            }
            Location::Unavailable => write!(f, "Not available"),
        }
    }
}

/// Trait for coordinate sources
pub trait LocationProvider: Send + Sync {
    fn locate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(f64, f64), LocationError>> + Send + 'a>>;
}

/// Coordinates supplied by configuration
pub struct FixedLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationProvider for FixedLocation {
    fn locate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(f64, f64), LocationError>> + Send + 'a>> {
        Box::pin(async move { Ok((self.latitude, self.longitude)) })
    }
}

/// Looks up coordinates from an HTTP endpoint returning
/// `{"latitude": .., "longitude": ..}`
pub struct HttpLocationProvider {
    client: Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct GeoResponse {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl HttpLocationProvider {
    /// Create a provider querying `url`
    ///
    /// # Errors
    ///
    /// Returns `LocationError::LookupFailed` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, LocationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LocationError::LookupFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl LocationProvider for HttpLocationProvider {
    fn locate<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<(f64, f64), LocationError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.url)
                .send()
                .await
                .map_err(|e| LocationError::LookupFailed(e.to_string()))?;

            if !response.status().is_success() {
                return Err(LocationError::LookupFailed(format!(
                    "status {}",
                    response.status()
                )));
            }

            let body: GeoResponse = response
                .json()
                .await
                .map_err(|e| LocationError::LookupFailed(e.to_string()))?;

            match (body.latitude, body.longitude) {
                (Some(latitude), Some(longitude)) => Ok((latitude, longitude)),
                _ => Err(LocationError::InvalidCoordinates),
            }
        })
    }
}

/// Round to `precision` decimal places
fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), LocationError> {
    if latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
    {
        Ok(())
    } else {
        Err(LocationError::InvalidCoordinates)
    }
}

/// Resolve the location once
///
/// Never fails: errors are logged and reported as `Unavailable`.
pub async fn resolve(
    provider: Option<&dyn LocationProvider>,
    precision: u32,
    timeout: Duration,
) -> Location {
    let Some(provider) = provider else {
        info!("No location provider configured");
        return Location::Unavailable;
    };

    let result = match tokio::time::timeout(timeout, provider.locate()).await {
        Ok(result) => result,
        Err(_) => Err(LocationError::LookupFailed(format!(
            "timed out after {:?}",
            timeout
        ))),
    };

    match result.and_then(|(latitude, longitude)| {
        check_coordinates(latitude, longitude).map(|_| (latitude, longitude))
    }) {
        Ok((latitude, longitude)) => {
            let location = Location::Coordinates {
                latitude: round_to(latitude, precision),
                longitude: round_to(longitude, precision),
                precision,
            };
            info!("Resolved location: {}", location);
            location
        }
        Err(e) => {
            warn!("Location unavailable: {}", e);
            Location::Unavailable
        }
    }
}
