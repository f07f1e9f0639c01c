//! IP geolocation via an HTTP lookup service
//!
//! Looks up country, region, ISP and AS organization for peer addresses
//! through an ip-api style JSON endpoint. The upstream service is
//! rate-limited, so the service enforces a minimum interval between
//! requests and callers are expected to cache results with a long TTL
//! (one lookup per IP per TTL, never one per cycle).

use serde::Deserialize;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::GeolocationConfig;
use crate::models::GeolocationRecord;

/// Errors that can occur during geolocation lookups
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Not a routable address: {0}")]
    NotRoutable(String),

    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Lookup service rejected '{ip}': {message}")]
    LookupFailed { ip: String, message: String },
}

/// Response shape of the ip-api JSON endpoint
#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
    #[serde(rename = "regionName", default)]
    region: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(rename = "as", default)]
    as_org: Option<String>,
}

/// Rate-limited geolocation lookup service
pub struct GeoLookupService {
    client: reqwest::Client,
    api_url: String,
    min_interval: Duration,
    /// Instant of the last upstream request; serializes the rate limit
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl GeoLookupService {
    /// Create a lookup service from the geolocation configuration section
    pub fn new(config: &GeolocationConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();

        GeoLookupService {
            client,
            api_url: config.api_url.clone(),
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Look up the geographic location of an IP address
    ///
    /// Waits out the configured minimum interval since the previous upstream
    /// request before sending. Private, loopback and unspecified addresses
    /// are rejected without a request.
    pub async fn lookup(&self, ip: &str) -> Result<GeolocationRecord, GeoError> {
        let parsed =
            IpAddr::from_str(ip).map_err(|_| GeoError::InvalidAddress(ip.to_string()))?;
        if !Self::is_routable(&parsed) {
            return Err(GeoError::NotRoutable(ip.to_string()));
        }

        self.throttle().await;

        let url = self.api_url.replace("{ip}", ip);
        let response: ApiResponse = self.client.get(&url).send().await?.json().await?;

        if response.status != "success" {
            return Err(GeoError::LookupFailed {
                ip: ip.to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| "no reason given".to_string()),
            });
        }

        Ok(GeolocationRecord {
            ip: ip.to_string(),
            country: response.country.unwrap_or_default(),
            country_code: response.country_code.unwrap_or_default(),
            region: response.region.unwrap_or_default(),
            city: response.city.unwrap_or_default(),
            lat: response.lat.unwrap_or(0.0),
            lon: response.lon.unwrap_or(0.0),
            isp: response.isp.unwrap_or_default(),
            as_org: response.as_org.unwrap_or_default(),
            fetched_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Look up an IP address, returning None instead of an error
    pub async fn lookup_optional(&self, ip: &str) -> Option<GeolocationRecord> {
        match self.lookup(ip).await {
            Ok(record) => Some(record),
            Err(GeoError::NotRoutable(_)) => None,
            Err(e) => {
                log::debug!("Geolocation lookup for {} failed: {}", ip, e);
                None
            }
        }
    }

    /// Sleep until the minimum interval since the last request has passed
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Whether an address can meaningfully be geolocated
    fn is_routable(ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => {
                !(v4.is_private()
                    || v4.is_loopback()
                    || v4.is_link_local()
                    || v4.is_unspecified()
                    || v4.is_broadcast())
            }
            IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
        }
    }
}

impl Clone for GeoLookupService {
    fn clone(&self) -> Self {
        GeoLookupService {
            client: self.client.clone(),
            api_url: self.api_url.clone(),
            min_interval: self.min_interval,
            last_request: Arc::clone(&self.last_request),
        }
    }
}
