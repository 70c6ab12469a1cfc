//! Core data models for bikecast
//!
//! Station records as accepted from the source, the snapshots and forecasts
//! written to the cache, and the key layout they are stored under.

pub mod fetcher;
pub mod source;

pub use fetcher::{name_contains, FetchSettings, PageFetcher, RecordFilter};
pub use source::{FetchError, RawStation, SeoulBikeClient, StationSource};

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Key prefix for live station snapshots
pub const SNAPSHOT_KEY_PREFIX: &str = "realtime:station:";

/// Key prefix for derived station forecasts
pub const FORECAST_KEY_PREFIX: &str = "prediction:station:";

/// Cache key of the snapshot for `station_id`
pub fn snapshot_key(station_id: &str) -> String {
    format!("{SNAPSHOT_KEY_PREFIX}{station_id}")
}

/// Cache key of the forecast for `station_id`
pub fn forecast_key(station_id: &str) -> String {
    format!("{FORECAST_KEY_PREFIX}{station_id}")
}

/// A station record that passed parsing, with every default applied
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub station_id: String,
    pub name: String,
    pub bikes_available: u32,
    pub docks_total: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// One station's live state at collection time
///
/// `bikes_available` may exceed `docks_total`; the source reports it that way
/// and it is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub station_id: String,
    pub name: String,
    pub bikes_available: u32,
    pub docks_total: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Collection time in the local collection timezone
    pub collected_at: DateTime<FixedOffset>,
}

impl StationSnapshot {
    pub fn from_record(record: StationRecord, collected_at: DateTime<FixedOffset>) -> Self {
        Self {
            station_id: record.station_id,
            name: record.name,
            bikes_available: record.bikes_available,
            docks_total: record.docks_total,
            latitude: record.latitude,
            longitude: record.longitude,
            collected_at,
        }
    }

    pub fn cache_key(&self) -> String {
        snapshot_key(&self.station_id)
    }
}

/// A short-horizon prediction derived from a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationForecast {
    pub station_id: String,
    pub predicted_bikes: i64,
    /// `computed_at` plus the forecast horizon
    pub target_time: DateTime<FixedOffset>,
    pub model_version: String,
    pub computed_at: DateTime<FixedOffset>,
}

impl StationForecast {
    pub fn cache_key(&self) -> String {
        forecast_key(&self.station_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn sample_record() -> StationRecord {
        StationRecord {
            station_id: "ST-4".to_string(),
            name: "102. 망원역 1번출구 앞".to_string(),
            bikes_available: 17,
            docks_total: 15,
            latitude: Some(37.5556488),
            longitude: Some(126.91062927),
        }
    }

    #[test]
    fn test_keys_are_namespaced_by_kind() {
        assert_eq!(snapshot_key("ST-4"), "realtime:station:ST-4");
        assert_eq!(forecast_key("ST-4"), "prediction:station:ST-4");
    }

    #[test]
    fn test_snapshot_keeps_overfull_station_as_is() {
        let at = kst().with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let snapshot = StationSnapshot::from_record(sample_record(), at);

        assert_eq!(snapshot.bikes_available, 17);
        assert_eq!(snapshot.docks_total, 15);
        assert_eq!(snapshot.cache_key(), "realtime:station:ST-4");
        assert_eq!(snapshot.collected_at, at);
    }

    #[test]
    fn test_snapshot_serializes_collection_offset() {
        let at = kst().with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        let snapshot = StationSnapshot::from_record(sample_record(), at);

        let json = serde_json::to_string(&snapshot).expect("Failed to serialize snapshot");

        assert!(json.contains("\"collected_at\":\"2024-05-01T08:00:00+09:00\""));
        assert!(json.contains("\"station_id\":\"ST-4\""));
    }
}
