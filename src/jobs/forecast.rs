//! Forecast refresh over every cached snapshot

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{Job, JobError, JobReport};
use crate::cache::{self, CacheError, CacheStore};
use crate::data::{StationSnapshot, SNAPSHOT_KEY_PREFIX};
use crate::forecast::ForecastModel;

/// Stations processed at once
const CONCURRENT_STATIONS: usize = 8;

/// Recomputes a forecast for every snapshot currently in the cache
#[derive(Debug)]
pub struct ForecastJob {
    store: Arc<dyn CacheStore>,
    model: Arc<dyn ForecastModel>,
    ttl: Duration,
    horizon: Duration,
    timezone: FixedOffset,
}

/// What happened to one scanned key
enum StationOutcome {
    Written,
    Vanished,
    Unreadable,
}

impl ForecastJob {
    pub fn new(
        store: Arc<dyn CacheStore>,
        model: Arc<dyn ForecastModel>,
        ttl: Duration,
        horizon: Duration,
        timezone: FixedOffset,
    ) -> Self {
        Self {
            store,
            model,
            ttl,
            horizon,
            timezone,
        }
    }

    async fn refresh_station(
        &self,
        key: String,
        now: DateTime<FixedOffset>,
    ) -> Result<StationOutcome, JobError> {
        let snapshot = match cache::get_json::<StationSnapshot>(&*self.store, &key).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(key = %key, "snapshot expired before it was read");
                return Ok(StationOutcome::Vanished);
            }
            Err(CacheError::Serialization(e)) => {
                warn!(key = %key, error = %e, "skipping undecodable snapshot");
                return Ok(StationOutcome::Unreadable);
            }
            Err(e) => return Err(e.into()),
        };

        let forecast = self.model.forecast(&snapshot, now, self.horizon);
        cache::put_json(&*self.store, &forecast.cache_key(), &forecast, self.ttl).await?;
        Ok(StationOutcome::Written)
    }
}

#[async_trait]
impl Job for ForecastJob {
    fn name(&self) -> &'static str {
        "forecast"
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let started = Instant::now();
        let keys = self.store.scan(SNAPSHOT_KEY_PREFIX).await?;
        let now = Utc::now().with_timezone(&self.timezone);

        let (written, vanished, unreadable) = stream::iter(keys)
            .map(|key| self.refresh_station(key, now))
            .buffer_unordered(CONCURRENT_STATIONS)
            .try_fold((0, 0, 0), |(written, vanished, unreadable), outcome| async move {
                Ok::<_, JobError>(match outcome {
                    StationOutcome::Written => (written + 1, vanished, unreadable),
                    StationOutcome::Vanished => (written, vanished + 1, unreadable),
                    StationOutcome::Unreadable => (written, vanished, unreadable + 1),
                })
            })
            .await?;

        info!(
            written,
            vanished,
            unreadable,
            model = self.model.version(),
            "forecast refresh finished"
        );
        Ok(JobReport {
            written,
            skipped: vanished + unreadable,
            requests: 0,
            elapsed: started.elapsed(),
        })
    }
}
