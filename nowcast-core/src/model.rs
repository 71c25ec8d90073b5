use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// A validated latitude/longitude pair. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    latitude: f64,
    longitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting values outside -90..=90 / -180..=180.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ErrorKind> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ErrorKind::Parse(format!(
                "latitude {latitude} outside -90..=90"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ErrorKind::Parse(format!(
                "longitude {longitude} outside -180..=180"
            )));
        }

        Ok(Self { latitude, longitude })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// What a geolocation source yields: a coordinate plus a best-effort place
/// name (e.g. "Lisbon, Portugal") used as a display fallback when the
/// weather provider does not name the location itself.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedPosition {
    pub coordinate: Coordinate,
    pub place: Option<String>,
}

impl LocatedPosition {
    pub fn new(coordinate: Coordinate) -> Self {
        Self { coordinate, place: None }
    }

    pub fn with_place(coordinate: Coordinate, place: impl Into<String>) -> Self {
        Self { coordinate, place: Some(place.into()) }
    }

    /// Place name, falling back to formatted coordinates.
    pub fn display_name(&self) -> String {
        self.place
            .clone()
            .unwrap_or_else(|| self.coordinate.to_string())
    }
}

/// Immutable record of observed conditions at a location. A new fetch
/// produces a new snapshot, never mutates a prior one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub provider: String,
    pub location_name: String,
    pub temperature_c: f64,
    pub feels_like_c: f64,
    pub condition: String,
    pub humidity_pct: u8,
    pub wind_speed_mps: f64,
    /// Observation instant as reported by the provider.
    pub observation_time: DateTime<Utc>,
    /// Instant this snapshot was produced from a provider response.
    pub fetched_at: DateTime<Utc>,
}

/// Progress/outcome of one resolution attempt. Owned exclusively by the
/// resolver; observers see it through a read-only `watch` subscription.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResolutionState {
    #[default]
    Idle,
    Locating,
    Fetching,
    Ready(WeatherSnapshot),
    Failed(ErrorKind),
}

impl ResolutionState {
    /// True while an attempt is between start and settlement.
    pub fn is_pending(&self) -> bool {
        matches!(self, ResolutionState::Locating | ResolutionState::Fetching)
    }

    /// True once an attempt has produced an outcome.
    pub fn is_settled(&self) -> bool {
        matches!(self, ResolutionState::Ready(_) | ResolutionState::Failed(_))
    }
}
