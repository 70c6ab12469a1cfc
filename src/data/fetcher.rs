//! Sequential paginated fetching with record filtering
//!
//! A [`FetchPass`] walks the source window by window from offset 1, one
//! request at a time with a pause in between, and hands out the records that
//! survive parsing and the filter.

use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::source::{FetchError, RawStation, StationSource};
use super::StationRecord;

/// Predicate deciding which records a pass yields
pub type RecordFilter = Arc<dyn Fn(&StationRecord) -> bool + Send + Sync>;

/// Keeps records whose name contains `marker`
///
/// With the default marker `"역"` ("station") this selects bike stations next
/// to a rapid-transit stop.
pub fn name_contains(marker: impl Into<String>) -> RecordFilter {
    let marker = marker.into();
    Arc::new(move |record: &StationRecord| record.name.contains(marker.as_str()))
}

/// Pagination settings for one pass
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    /// Rows requested per window
    pub page_size: u32,
    /// Largest starting offset that is still requested
    pub max_start: u32,
    /// Pause between consecutive windows
    pub delay: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            max_start: 4000,
            delay: Duration::from_millis(250),
        }
    }
}

/// Counters for a single pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    /// Window requests issued, including a failed one
    pub requests: u32,
    /// Rows dropped because they could not be parsed
    pub malformed: u32,
    /// Rows dropped by the filter
    pub rejected: u32,
    /// Records handed out
    pub accepted: u32,
}

/// Produces fetch passes against a station source
#[derive(Clone)]
pub struct PageFetcher {
    source: Arc<dyn StationSource>,
    settings: FetchSettings,
    filter: RecordFilter,
}

impl fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageFetcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    pub fn new(source: Arc<dyn StationSource>, settings: FetchSettings, filter: RecordFilter) -> Self {
        let settings = FetchSettings {
            page_size: settings.page_size.max(1),
            ..settings
        };
        Self {
            source,
            settings,
            filter,
        }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Starts a fresh pass from offset 1
    pub fn pass(&self) -> FetchPass {
        FetchPass {
            fetcher: self.clone(),
            next_start: Some(1),
            buffer: VecDeque::new(),
            finished: false,
            stats: PassStats::default(),
        }
    }
}

/// One lazy walk over the source
///
/// Finite and not restartable: once [`FetchPass::next`] returns `None` or an
/// error, the pass is over.
pub struct FetchPass {
    fetcher: PageFetcher,
    next_start: Option<u32>,
    buffer: VecDeque<Value>,
    finished: bool,
    stats: PassStats,
}

impl FetchPass {
    /// Returns the next accepted record, fetching another window if needed
    ///
    /// `Some(Err(_))` means the current window request failed; the pass ends
    /// there.
    pub async fn next(&mut self) -> Option<Result<StationRecord, FetchError>> {
        loop {
            while let Some(row) = self.buffer.pop_front() {
                let Some(record) = RawStation::from_value(&row).and_then(RawStation::into_record)
                else {
                    self.stats.malformed += 1;
                    warn!(row = %row, "skipping malformed station record");
                    continue;
                };
                if !(self.fetcher.filter)(&record) {
                    self.stats.rejected += 1;
                    continue;
                }
                self.stats.accepted += 1;
                return Some(Ok(record));
            }

            if self.finished {
                return None;
            }
            let settings = &self.fetcher.settings;
            let Some(start) = self.next_start.filter(|start| *start <= settings.max_start) else {
                self.finished = true;
                return None;
            };

            if self.stats.requests > 0 && !settings.delay.is_zero() {
                tokio::time::sleep(settings.delay).await;
            }

            let end = start.saturating_add(settings.page_size - 1);
            self.next_start = start.checked_add(settings.page_size);
            self.stats.requests += 1;

            match self.fetcher.source.fetch_window(start, end).await {
                Ok(rows) if rows.is_empty() => {
                    debug!(start, end, "empty window, end of data");
                    self.finished = true;
                    return None;
                }
                Ok(rows) => {
                    debug!(start, end, rows = rows.len(), "fetched window");
                    self.buffer.extend(rows);
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }

    pub fn stats(&self) -> PassStats {
        self.stats
    }
}
