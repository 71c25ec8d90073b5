//! Current-position acquisition.
//!
//! The geolocation capability sits behind [`LocationSource`] so the resolver
//! can be driven by anything that produces a coordinate: the bundled
//! IP-geolocation lookup, a platform positioning service, or a fixed
//! position in tests.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::model::{Coordinate, LocatedPosition};

/// One-shot position acquisition.
///
/// Contract: every failure maps to [`ErrorKind::LocationUnavailable`]. The
/// resolver enforces the attempt timeout; implementations only need to bound
/// their own transport.
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn locate(&self) -> Result<LocatedPosition, ErrorKind>;
}

const IP_API_URL: &str = "http://ip-api.com/json";
const CLIENT_TIMEOUT_SECS: u64 = 10;

/// Position from IP geolocation, the closest thing a headless process has to
/// "where is this machine right now". City-level accuracy at best.
#[derive(Debug, Clone)]
pub struct IpLocator {
    http: Client,
    endpoint: String,
}

impl IpLocator {
    pub fn new() -> Result<Self, ErrorKind> {
        Self::with_endpoint(IP_API_URL)
    }

    /// Use a non-default lookup endpoint (tests point this at a mock server).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self, ErrorKind> {
        let http = Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ErrorKind::LocationUnavailable(e.to_string()))?;

        Ok(Self { http, endpoint: endpoint.into() })
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    city: Option<String>,
    country: Option<String>,
}

#[async_trait]
impl LocationSource for IpLocator {
    async fn locate(&self) -> Result<LocatedPosition, ErrorKind> {
        let res = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| ErrorKind::LocationUnavailable(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(ErrorKind::LocationUnavailable(format!(
                "geolocation lookup failed with status {status}"
            )));
        }

        let parsed: IpApiResponse = res
            .json()
            .await
            .map_err(|e| ErrorKind::LocationUnavailable(e.to_string()))?;

        if parsed.status != "success" {
            let reason = parsed.message.unwrap_or_else(|| "lookup refused".to_string());
            return Err(ErrorKind::LocationUnavailable(reason));
        }

        let (lat, lon) = match (parsed.lat, parsed.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(ErrorKind::LocationUnavailable(
                    "lookup answer carried no coordinates".to_string(),
                ));
            }
        };

        let coordinate = Coordinate::new(lat, lon)
            .map_err(|e| ErrorKind::LocationUnavailable(e.to_string()))?;

        let place = match (parsed.city, parsed.country) {
            (Some(city), Some(country)) => Some(format!("{city}, {country}")),
            (Some(city), None) => Some(city),
            (None, Some(country)) => Some(country),
            (None, None) => None,
        };

        tracing::debug!(%coordinate, place = place.as_deref(), "position acquired via IP lookup");

        Ok(LocatedPosition { coordinate, place })
    }
}
