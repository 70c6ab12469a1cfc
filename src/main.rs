//! bikecast - Seoul public bike occupancy collector
//!
//! Runs the collection and forecast jobs on their intervals, or performs a
//! single collection pass or cache lookup and exits.

use std::error::Error;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bikecast::cache::{CacheStore, FileStore, MemoryStore};
use bikecast::cli::{Cli, Command};
use bikecast::config::{CacheBackend, Config};
use bikecast::data::{name_contains, PageFetcher, SeoulBikeClient};
use bikecast::forecast::DummyModel;
use bikecast::jobs::{CollectionJob, ForecastJob, Job};
use bikecast::query::StationQueries;
use bikecast::scheduler::{JobHealth, Scheduler};

/// How often the run loop logs job health and purges expired files
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// The store actually in use, keeping the concrete type for housekeeping
enum Store {
    Memory(Arc<MemoryStore>),
    File(Arc<FileStore>),
}

impl Store {
    fn open(config: &Config) -> Result<Self, Box<dyn Error>> {
        match config.cache_backend {
            CacheBackend::Memory => Ok(Store::Memory(Arc::new(MemoryStore::new()))),
            CacheBackend::File => {
                let store = match &config.cache_dir {
                    Some(dir) => FileStore::with_dir(dir.clone()),
                    None => FileStore::new().ok_or("could not determine a cache directory")?,
                };
                info!(dir = %store.cache_dir().display(), "using file cache");
                Ok(Store::File(Arc::new(store)))
            }
        }
    }

    fn shared(&self) -> Arc<dyn CacheStore> {
        match self {
            Store::Memory(store) => store.clone(),
            Store::File(store) => store.clone(),
        }
    }

    async fn purge_expired(&self) {
        let result = match self {
            Store::Memory(store) => Ok(store.purge_expired()),
            Store::File(store) => store.purge_expired().await,
        };
        match result {
            Ok(0) => {}
            Ok(removed) => info!(removed, "purged expired cache entries"),
            Err(e) => warn!(error = %e, "failed to purge expired cache entries"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bikecast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn collection_job(config: &Config, store: Arc<dyn CacheStore>) -> Result<CollectionJob, Box<dyn Error>> {
    let client = SeoulBikeClient::new(
        config.api_base_url.clone(),
        config.api_key.clone(),
        config.request_timeout,
    )?;
    let fetcher = PageFetcher::new(
        Arc::new(client),
        config.fetch.clone(),
        name_contains(config.station_marker.clone()),
    );
    Ok(CollectionJob::new(fetcher, store, config.cache_ttl, config.timezone))
}

fn forecast_job(config: &Config, store: Arc<dyn CacheStore>) -> ForecastJob {
    ForecastJob::new(
        store,
        Arc::new(DummyModel),
        config.cache_ttl,
        config.forecast_horizon,
        config.timezone,
    )
}

fn log_health(health: &JobHealth) {
    let last = health
        .last_run
        .as_ref()
        .map(|run| format!("{:?} at {}", run.outcome, run.finished_at));
    info!(
        job = health.name,
        state = ?health.state,
        skipped = health.skipped,
        last_run = last.as_deref().unwrap_or("never"),
        "job health"
    );
}

async fn run_scheduler(config: &Config, store: Store, collect_on_start: bool) -> Result<(), Box<dyn Error>> {
    let collect = Arc::new(collection_job(config, store.shared())?);
    let forecast = Arc::new(forecast_job(config, store.shared()));
    let mut scheduler = Scheduler::new(collect, forecast, config.schedule.clone());
    scheduler.start();

    if collect_on_start {
        let outcome = scheduler.trigger_collection().await;
        info!(?outcome, "startup collection finished");
    }

    let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!(error = %e, "failed to listen for Ctrl-C");
                }
                break;
            }
            _ = housekeeping.tick() => {
                scheduler.health().iter().for_each(log_health);
                store.purge_expired().await;
            }
        }
    }

    info!("shutting down");
    scheduler.stop().await;
    Ok(())
}

async fn dispatch(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = cli.apply_to(Config::from_env()?)?;
    if config.uses_sample_key() {
        warn!("SEOUL_API_KEY not set, using the rate-limited sample key");
    }
    let store = Store::open(&config)?;

    match cli.command() {
        Command::Run { collect_on_start } => run_scheduler(&config, store, collect_on_start).await?,
        Command::Collect => {
            let report = collection_job(&config, store.shared())?.run().await?;
            println!("Collection finished: {report}");
        }
        Command::List { limit } => {
            let queries = StationQueries::new(store.shared());
            for snapshot in queries.list_snapshots(limit).await? {
                println!(
                    "{}\t{}\t{}/{}\t{}",
                    snapshot.station_id,
                    snapshot.name,
                    snapshot.bikes_available,
                    snapshot.docks_total,
                    snapshot.collected_at.to_rfc3339()
                );
            }
        }
        Command::Show { station_id } => {
            let snapshot = StationQueries::new(store.shared()).snapshot(&station_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Forecast { station_id } => {
            let forecast = StationQueries::new(store.shared()).forecast(&station_id).await?;
            println!("{}", serde_json::to_string_pretty(&forecast)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
