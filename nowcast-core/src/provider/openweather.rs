use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::ErrorKind,
    model::{LocatedPosition, WeatherSnapshot},
    provider::truncate_body,
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Use a non-default endpoint (tests point this at a mock server).
    pub fn with_base_url(api_key: String, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            http: Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    feels_like: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    description: String,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    name: String,
    dt: i64,
    main: OwMain,
    weather: Vec<OwWeather>,
    wind: OwWind,
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn current(&self, position: &LocatedPosition) -> Result<WeatherSnapshot, ErrorKind> {
        let url = format!("{}/data/2.5/weather", self.base_url);
        let coordinate = position.coordinate;

        let res = self
            .http
            .get(&url)
            .query(&[
                ("lat", coordinate.latitude().to_string().as_str()),
                ("lon", coordinate.longitude().to_string().as_str()),
                ("appid", self.api_key.as_str()),
                ("units", "metric"),
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
    let parsed: OwCurrentResponse =
        serde_json::from_str(body).map_err(|e| ErrorKind::Parse(e.to_string()))?;

    let fetched_at = Utc::now();
    let observation_time = unix_to_utc(parsed.dt).unwrap_or(fetched_at);

    let condition = parsed
        .weather
        .first()
        .map(|w| w.description.clone())
        .unwrap_or_else(|| "Unknown".to_string());

    // Some coordinates resolve to an unnamed station; fall back to the
    // position's own place name.
    let location_name = if parsed.name.is_empty() {
        position.display_name()
    } else {
        parsed.name
    };

    Ok(WeatherSnapshot {
        provider: "openweather".to_string(),
        location_name,
        temperature_c: parsed.main.temp,
        feels_like_c: parsed.main.feels_like,
        condition,
        humidity_pct: parsed.main.humidity,
        wind_speed_mps: parsed.wind.speed,
        observation_time,
        fetched_at,
    })
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts, 0)
}
