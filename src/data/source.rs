//! Seoul public bike API client
//!
//! Fetches one window of the `bikeList` dataset at a time. Rows come back as
//! loosely typed JSON; [`RawStation`] isolates that looseness from the rest of
//! the pipeline.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::StationRecord;

/// Default base URL of the Seoul open data API
pub const SEOUL_API_BASE_URL: &str = "http://openapi.seoul.go.kr:8088";

/// Result code the API returns when a window lies past the end of the data
const NO_DATA_CODE: &str = "INFO-200";

/// Result code of a successful request
const OK_CODE: &str = "INFO-000";

/// Errors that fail a whole fetch window
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed or timed out
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The source answered with a non-success HTTP status
    #[error("Source returned HTTP {status} for window {start}-{end}")]
    Status { status: u16, start: u32, end: u32 },

    /// Body was not JSON
    #[error("Failed to parse API response: {0}")]
    ParseError(#[from] serde_json::Error),

    /// The source reported an error result code
    #[error("Source error {code}: {message}")]
    Api { code: String, message: String },
}

/// A paginated source of station rows
///
/// Windows are 1-based and inclusive on both ends.
#[async_trait]
pub trait StationSource: Send + Sync {
    async fn fetch_window(&self, start: u32, end: u32) -> Result<Vec<Value>, FetchError>;
}

/// A station row exactly as the source sends it, every field optional
#[derive(Debug, Default, Deserialize)]
pub struct RawStation {
    #[serde(rename = "stationId")]
    pub station_id: Option<String>,
    #[serde(rename = "stationName")]
    pub station_name: Option<String>,
    /// Bikes currently parked; a numeric string in practice
    #[serde(rename = "parkingBikeTotCnt")]
    pub parking_bike_count: Option<Value>,
    /// Total racks at the station
    #[serde(rename = "rackTotCnt")]
    pub rack_count: Option<Value>,
    #[serde(rename = "stationLatitude")]
    pub latitude: Option<Value>,
    #[serde(rename = "stationLongitude")]
    pub longitude: Option<Value>,
}

impl RawStation {
    /// Decodes one row; `None` if the row is not an object of the expected shape
    pub fn from_value(row: &Value) -> Option<Self> {
        Self::deserialize(row).ok()
    }

    /// Applies the defaulting rules
    ///
    /// Returns `None` when the station id or name is missing or blank, since
    /// neither a cache key nor the name filter can be evaluated without them.
    pub fn into_record(self) -> Option<StationRecord> {
        let station_id = self.station_id.filter(|id| !id.trim().is_empty())?;
        let name = self.station_name.filter(|name| !name.trim().is_empty())?;
        Some(StationRecord {
            station_id: station_id.trim().to_string(),
            name,
            bikes_available: coerce_count(self.parking_bike_count.as_ref()),
            docks_total: coerce_count(self.rack_count.as_ref()),
            latitude: coerce_coordinate(self.latitude.as_ref()),
            longitude: coerce_coordinate(self.longitude.as_ref()),
        })
    }
}

/// Reads a count from a number or numeric string
///
/// Absent or unparsable values become 0 and negatives clamp to 0.
fn coerce_count(value: Option<&Value>) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    };
    parsed.unwrap_or(0).clamp(0, u32::MAX as i64) as u32
}

fn coerce_coordinate(value: Option<&Value>) -> Option<f64> {
    let parsed: Option<f64> = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

/// Extracts the row list from a `bikeList` response body
///
/// A body without a row list (the source's "no data" result) is an empty
/// page. An explicit error result code fails the window.
pub fn parse_page(body: &str) -> Result<Vec<Value>, FetchError> {
    let value: Value = serde_json::from_str(body)?;

    if let Some(status) = value.get("rentBikeStatus") {
        return Ok(status
            .get("row")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default());
    }

    let result = value.get("RESULT").unwrap_or(&value);
    match result.get("CODE").and_then(Value::as_str) {
        None | Some(NO_DATA_CODE) | Some(OK_CODE) => Ok(Vec::new()),
        Some(code) => Err(FetchError::Api {
            code: code.to_string(),
            message: result
                .get("MESSAGE")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
    }
}

/// Client for the Seoul public bike real-time availability API
#[derive(Debug, Clone)]
pub struct SeoulBikeClient {
    /// HTTP client for making requests, carrying the per-request timeout
    http_client: Client,
    /// Base URL for the API (allows override for testing)
    base_url: String,
    api_key: String,
}

impl SeoulBikeClient {
    /// Creates a client whose every request gives up after `timeout`
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn window_url(&self, start: u32, end: u32) -> String {
        format!(
            "{}/{}/json/bikeList/{}/{}/",
            self.base_url, self.api_key, start, end
        )
    }
}

#[async_trait]
impl StationSource for SeoulBikeClient {
    async fn fetch_window(&self, start: u32, end: u32) -> Result<Vec<Value>, FetchError> {
        let response = self
            .http_client
            .get(self.window_url(start, end))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                start,
                end,
            });
        }

        let body = response.text().await?;
        parse_page(&body)
    }
}
