//! Key/value cache with per-key expiry
//!
//! The [`CacheStore`] trait is the only shared resource of the pipeline: the
//! collection and forecast jobs write whole JSON values under namespaced keys,
//! and the read surface only reads. Two implementations are provided:
//! [`MemoryStore`] for a single process and [`FileStore`], which persists
//! entries to disk so another process can inspect them.

mod clock;
mod file;
mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a cache backend
///
/// Any of these aborts the calling job's current run; absence of a key is
/// never an error.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backing storage could not be read or written
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded or decoded
    #[error("Cache value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The TTL does not fit in a timestamp
    #[error("TTL out of range: {0:?}")]
    InvalidTtl(Duration),
}

/// A key/value store with per-key expiry
///
/// Every `set` replaces the whole value of a key, so concurrent readers
/// observe either the previous value or the new one, never a mix.
#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    /// Stores `value` under `key`, expiring `ttl` after the call.
    ///
    /// Overwrites any existing value and resets its expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Returns the current value of `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Returns every live key starting with `prefix`, in no particular order.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError>;
}

/// Serializes `value` as JSON and stores it under `key`
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), CacheError> {
    let json = serde_json::to_string(value)?;
    store.set(key, &json, ttl).await
}

/// Reads `key` and decodes it from JSON
///
/// Returns `Ok(None)` if the key is absent or expired.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn CacheStore,
    key: &str,
) -> Result<Option<T>, CacheError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Computes the expiry instant for an entry written at `now`
pub(crate) fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, CacheError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or(CacheError::InvalidTtl(ttl))
}
