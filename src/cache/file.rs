//! On-disk cache backend
//!
//! Stores one JSON envelope per key, with the key and its expiry timestamp
//! kept alongside the value. Lets a separate process read what a running
//! collector wrote.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use super::{expiry_after, CacheError, CacheStore, Clock, SystemClock};

const ENTRY_EXTENSION: &str = "json";

/// Distinguishes temp files of concurrent writers within the process
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Envelope stored on disk for every key
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// The key this entry belongs to
    key: String,
    /// The cached value, already serialized by the caller
    value: String,
    /// When the value was written
    cached_at: DateTime<Utc>,
    /// When the entry stops being visible
    expires_at: DateTime<Utc>,
}

/// Cache backend that keeps entries as files in a directory
///
/// Uses `~/.cache/bikecast/` on Linux by default. A write lands in a temp
/// file first and is renamed over the entry, so readers see either the old
/// or the new value in full.
///
/// Writes share a lock that [`FileStore::purge_expired`] takes exclusively,
/// so a sweep never removes a value renamed in after it checked the expiry.
#[derive(Debug, Clone)]
pub struct FileStore {
    /// Directory where entry files are stored
    cache_dir: PathBuf,
    clock: Arc<dyn Clock>,
    sweep: Arc<RwLock<()>>,
}

impl FileStore {
    /// Creates a store in the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "bikecast")?;
        Some(Self::with_dir(project_dirs.cache_dir().to_path_buf()))
    }

    /// Creates a store rooted at `cache_dir`
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            clock: Arc::new(SystemClock),
            sweep: Arc::new(RwLock::new(())),
        }
    }

    /// Replaces the time source used for stamping and expiry
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", encode_key(key), ENTRY_EXTENSION))
    }

    /// Reads and decodes the envelope at `path`
    ///
    /// A missing file is `Ok(None)`. An unreadable envelope is treated as
    /// absent as well; it is overwritten by the next write of that key.
    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>, CacheError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                Ok(None)
            }
        }
    }

    /// Deletes every expired entry file, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let _sweep = self.sweep.write().await;
        let now = self.clock.now();
        let mut removed = 0;
        for path in self.entry_files().await? {
            if let Some(entry) = self.read_entry(&path).await? {
                if now >= entry.expires_at && remove_if_present(&path).await? {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>, CacheError> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl CacheStore for FileStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let _write = self.sweep.read().await;
        fs::create_dir_all(&self.cache_dir).await?;

        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value: value.to_string(),
            cached_at: now,
            expires_at: expiry_after(now, ttl)?,
        };
        let json = serde_json::to_string_pretty(&entry)?;

        let target = self.entry_path(key);
        let temp = self.cache_dir.join(format!(
            ".{}.{}.{}.tmp",
            encode_key(key),
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp, json).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let Some(entry) = self.read_entry(&self.entry_path(key)).await? else {
            return Ok(None);
        };
        if self.clock.now() >= entry.expires_at {
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let now = self.clock.now();
        let mut keys = Vec::new();
        for path in self.entry_files().await? {
            let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_key)
            else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(entry) = self.read_entry(&path).await? {
                if now < entry.expires_at {
                    keys.push(entry.key);
                }
            }
        }
        Ok(keys)
    }
}

async fn remove_if_present(path: &Path) -> Result<bool, CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Maps a key to a file-name-safe form
fn encode_key(key: &str) -> String {
    urlencoding::encode(key).into_owned()
}

/// Inverse of [`encode_key`]
fn decode_key(name: &str) -> Option<String> {
    urlencoding::decode(name).ok().map(|key| key.into_owned())
}
