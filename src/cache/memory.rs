//! In-process cache backend

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use super::{expiry_after, CacheError, CacheStore, Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// A cache held in process memory
///
/// Entries are replaced whole under a write lock. Expired entries are hidden
/// from `get` and `scan` immediately and dropped by
/// [`MemoryStore::purge_expired`].
#[derive(Debug)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store that reads time from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Drops every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Number of entries held, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = expiry_after(self.clock.now(), ttl)?;
        let entry = Entry {
            value: value.to_string(),
            expires_at,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;

    fn create_test_store() -> (MemoryStore, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        (store, clock)
    }

    #[tokio::test]
    async fn test_get_returns_value_immediately_after_set() {
        let (store, _clock) = create_test_store();

        store.set("k", "v", Duration::from_secs(10)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_get_returns_none_after_ttl_elapses() {
        let (store, clock) = create_test_store();
        store.set("k", "v", Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(store.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_resets_expiry() {
        let (store, clock) = create_test_store();
        store.set("k", "first", Duration::from_secs(10)).await.unwrap();

        clock.advance(Duration::from_secs(8));
        store.set("k", "second", Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(8));

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_scan_filters_by_prefix_and_expiry() {
        let (store, clock) = create_test_store();
        store
            .set("realtime:station:A", "a", Duration::from_secs(5))
            .await
            .unwrap();
        store
            .set("realtime:station:B", "b", Duration::from_secs(50))
            .await
            .unwrap();
        store
            .set("prediction:station:A", "p", Duration::from_secs(50))
            .await
            .unwrap();

        let mut keys = store.scan("realtime:station:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["realtime:station:A", "realtime:station:B"]);

        clock.advance(Duration::from_secs(5));
        let keys = store.scan("realtime:station:").await.unwrap();
        assert_eq!(keys, vec!["realtime:station:B"]);
    }

    #[tokio::test]
    async fn test_purge_expired_drops_only_dead_entries() {
        let (store, clock) = create_test_store();
        store.set("short", "1", Duration::from_secs(1)).await.unwrap();
        store.set("long", "2", Duration::from_secs(100)).await.unwrap();

        clock.advance(Duration::from_secs(2));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_one_whole_value() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let value = format!("writer-{i}-").repeat(64);
                store.set("shared", &value, Duration::from_secs(60)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value = store.get("shared").await.unwrap().unwrap();
        let first = value.split('-').nth(1).unwrap();
        assert_eq!(value, format!("writer-{first}-").repeat(64));
    }
}
