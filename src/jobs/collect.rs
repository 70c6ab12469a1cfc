//! One full collection pass into the cache

use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{Job, JobError, JobReport};
use crate::cache::{self, CacheStore};
use crate::data::{PageFetcher, StationSnapshot};

/// Fetches every accepted station and writes it as a snapshot
///
/// Keys derive from the station id, so repeated runs overwrite and refresh
/// TTLs rather than accumulate. A failed window ends the run; snapshots
/// already written in that run stay valid.
#[derive(Debug)]
pub struct CollectionJob {
    fetcher: PageFetcher,
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    timezone: FixedOffset,
}

impl CollectionJob {
    pub fn new(
        fetcher: PageFetcher,
        store: Arc<dyn CacheStore>,
        ttl: Duration,
        timezone: FixedOffset,
    ) -> Self {
        Self {
            fetcher,
            store,
            ttl,
            timezone,
        }
    }
}

#[async_trait]
impl Job for CollectionJob {
    fn name(&self) -> &'static str {
        "collect"
    }

    async fn run(&self) -> Result<JobReport, JobError> {
        let started = Instant::now();
        let mut pass = self.fetcher.pass();
        let mut written = 0;

        while let Some(record) = pass.next().await {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    let stats = pass.stats();
                    warn!(
                        written,
                        requests = stats.requests,
                        error = %e,
                        "collection pass aborted"
                    );
                    return Err(e.into());
                }
            };

            let snapshot =
                StationSnapshot::from_record(record, Utc::now().with_timezone(&self.timezone));
            cache::put_json(&*self.store, &snapshot.cache_key(), &snapshot, self.ttl).await?;
            written += 1;
        }

        let stats = pass.stats();
        let report = JobReport {
            written,
            skipped: stats.malformed as usize,
            requests: stats.requests,
            elapsed: started.elapsed(),
        };
        info!(
            written = report.written,
            malformed = stats.malformed,
            filtered_out = stats.rejected,
            requests = report.requests,
            "collection pass finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::data::{name_contains, FetchError, FetchSettings, StationSource};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct PagedSource {
        pages: Mutex<Vec<Result<Vec<Value>, FetchError>>>,
    }

    #[async_trait]
    impl StationSource for PagedSource {
        async fn fetch_window(&self, _start: u32, _end: u32) -> Result<Vec<Value>, FetchError> {
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(Vec::new())
            } else {
                pages.remove(0)
            }
        }
    }

    fn kst() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn job_with(
        pages: Vec<Result<Vec<Value>, FetchError>>,
        store: Arc<MemoryStore>,
    ) -> CollectionJob {
        let source = Arc::new(PagedSource {
            pages: Mutex::new(pages),
        });
        let settings = FetchSettings {
            page_size: 2,
            max_start: 100,
            delay: Duration::ZERO,
        };
        CollectionJob::new(
            PageFetcher::new(source, settings, name_contains("역")),
            store,
            Duration::from_secs(3600),
            kst(),
        )
    }

    #[tokio::test]
    async fn test_writes_snapshot_with_source_counts() {
        let store = Arc::new(MemoryStore::new());
        let job = job_with(
            vec![Ok(vec![json!({
                "stationId": "ST-10",
                "stationName": "108. 서교동 사거리 홍대입구역",
                "parkingBikeTotCnt": "22",
                "rackTotCnt": "12",
                "stationLatitude": "37.552746",
                "stationLongitude": "126.918617"
            })])],
            store.clone(),
        );

        let report = job.run().await.unwrap();
        assert_eq!(report.written, 1);

        let snapshot: StationSnapshot = cache::get_json(&*store, "realtime:station:ST-10")
            .await
            .unwrap()
            .expect("Snapshot should be cached");
        assert_eq!(snapshot.bikes_available, 22);
        assert_eq!(snapshot.docks_total, 12);
        assert_eq!(snapshot.collected_at.offset(), &kst());
    }

    #[tokio::test]
    async fn test_running_twice_does_not_duplicate_keys() {
        let store = Arc::new(MemoryStore::new());
        let page = || Ok(vec![json!({"stationId": "ST-1", "stationName": "1. 시청역"})]);
        let job = job_with(vec![page(), Ok(vec![]), page(), Ok(vec![])], store.clone());

        job.run().await.unwrap();
        job.run().await.unwrap();

        assert_eq!(store.scan("realtime:station:").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_earlier_writes_and_fails_run() {
        let store = Arc::new(MemoryStore::new());
        let job = job_with(
            vec![
                Ok(vec![
                    json!({"stationId": "ST-1", "stationName": "1. 시청역"}),
                    json!({"stationId": "ST-2", "stationName": "2. 종각역"}),
                ]),
                Err(FetchError::Status {
                    status: 500,
                    start: 3,
                    end: 4,
                }),
            ],
            store.clone(),
        );

        let result = job.run().await;

        assert!(matches!(result, Err(JobError::Fetch(_))));
        let mut keys = store.scan("realtime:station:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["realtime:station:ST-1", "realtime:station:ST-2"]);
    }
}
