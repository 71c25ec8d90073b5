use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ErrorKind,
    model::{LocatedPosition, WeatherSnapshot},
    provider::truncate_body,
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";

/// Open-Meteo current conditions. Keyless, so it is the out-of-the-box
/// default provider.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    base_url: String,
    http: Client,
}

impl Default for OpenMeteoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenMeteoProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Use a non-default endpoint (tests point this at a mock server).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OmCurrent {
    time: Option<String>,
    temperature_2m: f64,
    apparent_temperature: f64,
    relative_humidity_2m: f64,
    weather_code: i32,
    wind_speed_10m: f64,
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    current: OmCurrent,
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    async fn current(&self, position: &LocatedPosition) -> Result<WeatherSnapshot, ErrorKind> {
        let url = format!("{}/v1/forecast", self.base_url);
        let coordinate = position.coordinate;

        let res = self
            .http
            .get(&url)
            .query(&[
                ("latitude", coordinate.latitude().to_string().as_str()),
                ("longitude", coordinate.longitude().to_string().as_str()),
                (
                    "current",
                    "temperature_2m,apparent_temperature,relative_humidity_2m,\
                     weather_code,wind_speed_10m",
                ),
                ("wind_speed_unit", "ms"),
                ("timezone", "UTC"),
            ])
            .send()
            .await?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ErrorKind::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ErrorKind::Provider {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        parse_current(&body, position)
    }
}

fn parse_current(body: &str, position: &LocatedPosition) -> Result<WeatherSnapshot, ErrorKind> {
    let parsed: OmResponse =
        serde_json::from_str(body).map_err(|e| ErrorKind::Parse(e.to_string()))?;

    let fetched_at = Utc::now();
    let observation_time = parsed
        .current
        .time
        .as_deref()
        .and_then(parse_iso_minute)
        .unwrap_or(fetched_at);

    Ok(WeatherSnapshot {
        provider: "openmeteo".to_string(),
        location_name: position.display_name(),
        temperature_c: parsed.current.temperature_2m,
        feels_like_c: parsed.current.apparent_temperature,
        condition: condition_from_wmo(parsed.current.weather_code).to_string(),
        humidity_pct: parsed.current.relative_humidity_2m.clamp(0.0, 100.0).round() as u8,
        wind_speed_mps: parsed.current.wind_speed_10m,
        observation_time,
        fetched_at,
    })
}

/// Open-Meteo reports minute-resolution ISO times without a zone suffix.
fn parse_iso_minute(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .map(|ndt| ndt.and_utc())
        .ok()
}

/// Map a WMO weather code to a display description.
/// See: https://open-meteo.com/en/docs#weathervariables
fn condition_from_wmo(code: i32) -> &'static str {
    match code {
        0 => "Clear",
        1..=2 => "Partly Cloudy",
        3 => "Cloudy",
        45 | 48 => "Fog",
        51 | 53 | 55 => "Drizzle",
        56 | 57 | 66 | 67 => "Sleet",
        61 | 63 | 80 => "Rain",
        65 | 81 | 82 => "Heavy Rain",
        71 | 73 | 75 | 77 | 85 | 86 => "Snow",
        95 | 96 | 99 => "Thunderstorm",
        _ => "Unknown",
    }
}
