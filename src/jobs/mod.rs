//! Jobs driven by the scheduler
//!
//! Each job is one self-contained run that regenerates its cache keys from
//! scratch. Failures end the run and are reported to the caller; nothing is
//! carried over to the next run.

mod collect;
mod forecast;

pub use collect::CollectionJob;
pub use forecast::ForecastJob;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheError;
use crate::data::FetchError;

/// Errors that abort a job run
#[derive(Debug, Error)]
pub enum JobError {
    /// A source window could not be fetched
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The cache could not be read or written
    #[error("Cache failed: {0}")]
    Cache(#[from] CacheError),
}

/// Summary of one completed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Cache entries written
    pub written: usize,
    /// Inputs dropped without failing the run
    pub skipped: usize,
    /// Requests issued to the external source
    pub requests: u32,
    pub elapsed: Duration,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} written, {} skipped, {} requests in {:.2?}",
            self.written, self.skipped, self.requests, self.elapsed
        )
    }
}

/// A unit of work the scheduler can run
#[async_trait]
pub trait Job: Send + Sync {
    /// Short name used in logs and health output
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<JobReport, JobError>;
}
