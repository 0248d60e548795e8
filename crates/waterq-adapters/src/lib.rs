//! Measurement endpoint adapter: how a station's raw payload is fetched and
//! how it is normalized into measurements.

mod coerce;
mod parser;

use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use waterq_core::Station;
use waterq_storage::{FetchError, HttpFetcher};

pub use coerce::{coerce_str, coerce_value, is_truthy};
pub use parser::{parse_capture, parse_observed_at, ParseError, OBSERVATION_TIME_SUFFIX};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Source of raw per-station payloads.
#[async_trait]
pub trait MeasurementSource: Send + Sync {
    /// Returns the unparsed response body for one station.
    async fn fetch_station(&self, station: &Station) -> Result<String, AdapterError>;
}

/// Body of the per-station request.
pub fn station_request(station: &Station) -> serde_json::Value {
    json!({ "estacion": station.code })
}

/// BMWP endpoint reached with one JSON POST per station.
#[derive(Debug, Clone)]
pub struct BmwpEndpoint {
    http: HttpFetcher,
    url: String,
}

impl BmwpEndpoint {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MeasurementSource for BmwpEndpoint {
    async fn fetch_station(&self, station: &Station) -> Result<String, AdapterError> {
        Ok(self
            .http
            .post_json(&self.url, &station_request(station))
            .await?)
    }
}
