//! Read access to cached snapshots and forecasts
//!
//! A missing key is reported as [`QueryError::NotFound`], kept apart from
//! cache failures so callers can tell "no data" from "could not look".

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::cache::{self, CacheError, CacheStore};
use crate::data::{
    forecast_key, snapshot_key, StationForecast, StationSnapshot, SNAPSHOT_KEY_PREFIX,
};

/// Default number of snapshots returned by a listing
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Upper bound on a listing, whatever the caller asks for
pub const MAX_LIST_LIMIT: usize = 1000;

/// Errors returned by station queries
#[derive(Debug, Error)]
pub enum QueryError {
    /// Nothing is cached under the requested station
    #[error("No {kind} cached for station {station_id}")]
    NotFound {
        kind: &'static str,
        station_id: String,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Read-only view over the cache
#[derive(Debug, Clone)]
pub struct StationQueries {
    store: Arc<dyn CacheStore>,
}

impl StationQueries {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Lists up to `limit` live snapshots, ordered by station id
    pub async fn list_snapshots(&self, limit: usize) -> Result<Vec<StationSnapshot>, QueryError> {
        let mut keys = self.store.scan(SNAPSHOT_KEY_PREFIX).await?;
        keys.sort();

        let limit = limit.min(MAX_LIST_LIMIT);
        let mut snapshots = Vec::with_capacity(limit.min(keys.len()));
        for key in keys {
            if snapshots.len() >= limit {
                break;
            }
            match cache::get_json::<StationSnapshot>(&*self.store, &key).await {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(CacheError::Serialization(e)) => {
                    debug!(key = %key, error = %e, "skipping undecodable snapshot");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(snapshots)
    }

    pub async fn snapshot(&self, station_id: &str) -> Result<StationSnapshot, QueryError> {
        cache::get_json(&*self.store, &snapshot_key(station_id))
            .await?
            .ok_or_else(|| QueryError::NotFound {
                kind: "snapshot",
                station_id: station_id.to_string(),
            })
    }

    pub async fn forecast(&self, station_id: &str) -> Result<StationForecast, QueryError> {
        cache::get_json(&*self.store, &forecast_key(station_id))
            .await?
            .ok_or_else(|| QueryError::NotFound {
                kind: "forecast",
                station_id: station_id.to_string(),
            })
    }
}
