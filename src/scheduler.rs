//! Periodic job scheduling
//!
//! Runs the collection and forecast jobs on independent intervals. Each job
//! lives in a [`JobSlot`] that allows one execution at a time: a firing that
//! arrives while the previous run of the same job is still going is skipped,
//! never queued. The two jobs do not block each other.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::jobs::{Job, JobReport};

/// Configuration for job intervals
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Interval between collection passes
    pub collect_interval: Duration,
    /// Interval between forecast refreshes
    pub forecast_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collect_interval: Duration::from_secs(600), // 10 minutes
            forecast_interval: Duration::from_secs(300), // 5 minutes
        }
    }
}

/// What caused a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scheduled,
    Manual,
}

/// Result of asking a slot to run its job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The job ran to completion
    Completed(JobReport),
    /// The job ran and failed; the message is the error it returned
    Failed(String),
    /// A run of the same job was already in progress
    Skipped,
}

/// Execution state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// Record of the most recent finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastRun {
    pub trigger: Trigger,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

/// Health snapshot of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHealth {
    pub name: &'static str,
    pub state: JobState,
    /// Firings dropped because a run was in progress
    pub skipped: u64,
    pub last_run: Option<LastRun>,
}

/// A job together with its `Idle`/`Running` state
pub struct JobSlot {
    job: Arc<dyn Job>,
    running: AtomicBool,
    skipped: AtomicU64,
    last_run: Mutex<Option<LastRun>>,
}

/// Puts a slot back to `Idle` when its run ends, including by panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl JobSlot {
    pub fn new(job: Arc<dyn Job>) -> Self {
        Self {
            job,
            running: AtomicBool::new(false),
            skipped: AtomicU64::new(0),
            last_run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    pub fn state(&self) -> JobState {
        if self.running.load(Ordering::Acquire) {
            JobState::Running
        } else {
            JobState::Idle
        }
    }

    /// Runs the job now unless a run is already in progress
    ///
    /// Job errors are logged and returned as [`RunOutcome::Failed`]; they never
    /// escape the slot.
    pub async fn run(&self, trigger: Trigger) -> RunOutcome {
        let job = self.name();
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            info!(job, ?trigger, "previous run still in progress, skipping");
            return RunOutcome::Skipped;
        }
        let _guard = RunningGuard(&self.running);

        info!(job, ?trigger, "job started");
        let outcome = match self.job.run().await {
            Ok(report) => {
                info!(job, %report, "job completed");
                RunOutcome::Completed(report)
            }
            Err(e) => {
                error!(job, error = %e, "job failed");
                RunOutcome::Failed(e.to_string())
            }
        };

        *self.last_run.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastRun {
            trigger,
            finished_at: Utc::now(),
            outcome: outcome.clone(),
        });
        outcome
    }

    pub fn health(&self) -> JobHealth {
        JobHealth {
            name: self.name(),
            state: self.state(),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_run: self
                .last_run
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

impl fmt::Debug for JobSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSlot")
            .field("job", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Owns the two job slots and their tickers
///
/// Nothing fires until [`Scheduler::start`]. [`Scheduler::stop`] ends the
/// tickers; runs already in flight are left to finish on the runtime.
#[derive(Debug)]
pub struct Scheduler {
    collect: Arc<JobSlot>,
    forecast: Arc<JobSlot>,
    config: ScheduleConfig,
    shutdown: CancellationToken,
    tickers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(collect: Arc<dyn Job>, forecast: Arc<dyn Job>, config: ScheduleConfig) -> Self {
        Self {
            collect: Arc::new(JobSlot::new(collect)),
            forecast: Arc::new(JobSlot::new(forecast)),
            config,
            shutdown: CancellationToken::new(),
            tickers: Vec::new(),
        }
    }

    /// Spawns the tickers; the first firing of each job is one interval away
    ///
    /// Calling `start` on a running scheduler does nothing.
    pub fn start(&mut self) {
        if !self.tickers.is_empty() {
            warn!("scheduler already started");
            return;
        }
        self.shutdown = CancellationToken::new();
        self.tickers.push(spawn_ticker(
            self.collect.clone(),
            self.config.collect_interval,
            self.shutdown.clone(),
        ));
        self.tickers.push(spawn_ticker(
            self.forecast.clone(),
            self.config.forecast_interval,
            self.shutdown.clone(),
        ));
        info!(
            collect_every = ?self.config.collect_interval,
            forecast_every = ?self.config.forecast_interval,
            "scheduler started"
        );
    }

    /// Stops issuing firings and waits for the tickers to exit
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for ticker in self.tickers.drain(..) {
            let _ = ticker.await;
        }
        info!("scheduler stopped");
    }

    /// Runs the collection job now, under the same overlap rule as its timer
    pub async fn trigger_collection(&self) -> RunOutcome {
        self.collect.run(Trigger::Manual).await
    }

    pub fn health(&self) -> [JobHealth; 2] {
        [self.collect.health(), self.forecast.health()]
    }
}

/// Fires `slot` every `period` until `shutdown` is cancelled
///
/// Each firing runs in its own task so the ticker keeps its cadence while a
/// long run is in progress; the slot decides whether the firing is skipped.
fn spawn_ticker(
    slot: Arc<JobSlot>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    let slot = slot.clone();
                    tokio::spawn(async move {
                        slot.run(Trigger::Scheduled).await;
                    });
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheError;
    use crate::jobs::JobError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Blocks inside `run` until released
    #[derive(Default)]
    struct GatedJob {
        started: Notify,
        release: Notify,
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl Job for GatedJob {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn run(&self) -> Result<JobReport, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.started.notify_one();
            self.release.notified().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(JobReport {
                written: 1,
                ..Default::default()
            })
        }
    }

    /// Counts runs and finishes immediately
    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> Result<JobReport, JobError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(JobReport::default())
        }
    }

    /// Fails every run the way an unreachable cache would
    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self) -> Result<JobReport, JobError> {
            Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))
            .into())
        }
    }

    fn config(collect_secs: u64, forecast_secs: u64) -> ScheduleConfig {
        ScheduleConfig {
            collect_interval: Duration::from_secs(collect_secs),
            forecast_interval: Duration::from_secs(forecast_secs),
        }
    }

    #[test]
    fn test_schedule_config_default() {
        let config = ScheduleConfig::default();
        assert_eq!(config.collect_interval, Duration::from_secs(600));
        assert_eq!(config.forecast_interval, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_second_trigger_while_running_is_skipped() {
        let job = Arc::new(GatedJob::default());
        let scheduler = Arc::new(Scheduler::new(
            job.clone(),
            Arc::new(CountingJob::default()),
            ScheduleConfig::default(),
        ));

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.trigger_collection().await }
        });
        job.started.notified().await;

        assert_eq!(scheduler.health()[0].state, JobState::Running);
        assert_eq!(scheduler.trigger_collection().await, RunOutcome::Skipped);

        job.release.notify_one();
        let outcome = first.await.unwrap();

        assert!(matches!(outcome, RunOutcome::Completed(ref r) if r.written == 1));
        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);

        let [health, _] = scheduler.health();
        assert_eq!(health.state, JobState::Idle);
        assert_eq!(health.skipped, 1);
        assert_eq!(health.last_run.as_ref().unwrap().trigger, Trigger::Manual);
    }

    #[tokio::test]
    async fn test_failure_returns_slot_to_idle_and_next_run_retries() {
        let slot = JobSlot::new(Arc::new(FailingJob));

        let first = slot.run(Trigger::Scheduled).await;
        let second = slot.run(Trigger::Manual).await;

        assert!(matches!(first, RunOutcome::Failed(ref msg) if msg.contains("connection refused")));
        assert!(matches!(second, RunOutcome::Failed(_)));
        assert_eq!(slot.state(), JobState::Idle);
        assert_eq!(slot.health().skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_firings_skip_while_job_is_blocked() {
        let collect = Arc::new(GatedJob::default());
        let forecast = Arc::new(CountingJob::default());
        let mut scheduler = Scheduler::new(collect.clone(), forecast.clone(), config(10, 5));
        scheduler.start();

        collect.started.notified().await;
        time::sleep(Duration::from_secs(35)).await;

        assert_eq!(collect.runs.load(Ordering::SeqCst), 1);
        assert!(scheduler.health()[0].skipped >= 2);
        assert!(
            forecast.runs.load(Ordering::SeqCst) >= 5,
            "forecast keeps running while collection is blocked"
        );

        collect.release.notify_one();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.health()[0].state, JobState::Idle);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_firings_after_stop() {
        let collect = Arc::new(CountingJob::default());
        let forecast = Arc::new(CountingJob::default());
        let mut scheduler = Scheduler::new(collect.clone(), forecast.clone(), config(10, 10));
        scheduler.start();

        time::sleep(Duration::from_secs(25)).await;
        scheduler.stop().await;
        let collected = collect.runs.load(Ordering::SeqCst);
        assert_eq!(collected, 2);

        time::sleep(Duration::from_secs(100)).await;
        assert_eq!(collect.runs.load(Ordering::SeqCst), collected);
        assert_eq!(forecast.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_does_not_shift_schedule() {
        let collect = Arc::new(CountingJob::default());
        let mut scheduler = Scheduler::new(
            collect.clone(),
            Arc::new(CountingJob::default()),
            config(10, 60),
        );
        scheduler.start();

        time::sleep(Duration::from_secs(4)).await;
        assert!(matches!(
            scheduler.trigger_collection().await,
            RunOutcome::Completed(_)
        ));
        time::sleep(Duration::from_secs(7)).await;

        assert_eq!(collect.runs.load(Ordering::SeqCst), 2);
        scheduler.stop().await;
    }
}
