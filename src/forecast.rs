//! Forecast models
//!
//! A [`ForecastModel`] turns one snapshot into one forecast. The forecast job
//! only depends on this trait, so a real model can replace [`DummyModel`]
//! without touching scheduling or cache writes.

use chrono::{DateTime, FixedOffset};
use std::fmt;
use std::time::Duration;

use crate::data::{StationForecast, StationSnapshot};

/// Given a snapshot, produces a forecast
pub trait ForecastModel: Send + Sync + fmt::Debug {
    /// Tag stored in every forecast this model produces
    fn version(&self) -> &str;

    /// Predicts the station's state `horizon` after `now`
    fn forecast(
        &self,
        snapshot: &StationSnapshot,
        now: DateTime<FixedOffset>,
        horizon: Duration,
    ) -> StationForecast;
}

/// Placeholder model: one more bike than right now
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyModel;

impl DummyModel {
    pub const VERSION: &'static str = "v1-dummy";
}

impl ForecastModel for DummyModel {
    fn version(&self) -> &str {
        Self::VERSION
    }

    fn forecast(
        &self,
        snapshot: &StationSnapshot,
        now: DateTime<FixedOffset>,
        horizon: Duration,
    ) -> StationForecast {
        StationForecast {
            station_id: snapshot.station_id.clone(),
            predicted_bikes: i64::from(snapshot.bikes_available) + 1,
            target_time: target_time(now, horizon),
            model_version: self.version().to_string(),
            computed_at: now,
        }
    }
}

/// `now + horizon`, saturating at the largest representable time
pub fn target_time(now: DateTime<FixedOffset>, horizon: Duration) -> DateTime<FixedOffset> {
    chrono::Duration::from_std(horizon)
        .ok()
        .and_then(|horizon| now.checked_add_signed(horizon))
        .unwrap_or_else(|| DateTime::<chrono::Utc>::MAX_UTC.with_timezone(now.offset()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(bikes: u32) -> StationSnapshot {
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        StationSnapshot {
            station_id: "ST-1".to_string(),
            name: "1. 시청역".to_string(),
            bikes_available: bikes,
            docks_total: 10,
            latitude: None,
            longitude: None,
            collected_at: kst.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_dummy_model_adds_one_bike() {
        let now = snapshot(0).collected_at;
        for bikes in [0, 5, 40] {
            let forecast = DummyModel.forecast(&snapshot(bikes), now, Duration::from_secs(600));
            assert_eq!(forecast.predicted_bikes, i64::from(bikes) + 1);
        }
    }

    #[test]
    fn test_dummy_model_target_time_is_computed_at_plus_horizon() {
        let now = snapshot(3).collected_at;
        let forecast = DummyModel.forecast(&snapshot(3), now, Duration::from_secs(600));

        assert_eq!(forecast.computed_at, now);
        assert_eq!(
            forecast.target_time,
            forecast.computed_at + chrono::Duration::minutes(10)
        );
        assert_eq!(forecast.model_version, "v1-dummy");
        assert_eq!(forecast.station_id, "ST-1");
    }

    #[test]
    fn test_dummy_model_handles_max_count() {
        let now = snapshot(0).collected_at;
        let forecast = DummyModel.forecast(&snapshot(u32::MAX), now, Duration::ZERO);
        assert_eq!(forecast.predicted_bikes, i64::from(u32::MAX) + 1);
    }
}
