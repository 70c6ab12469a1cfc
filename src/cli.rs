//! Command-line interface parsing for bikecast
//!
//! Handles the subcommands and the cache overrides that are applied on top
//! of the environment configuration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::{CacheBackend, Config};
use crate::query::DEFAULT_LIST_LIMIT;

/// Error types for CLI argument handling
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified backend name is not recognized
    #[error("Invalid cache backend: '{0}'. Valid backends: memory, file")]
    InvalidBackend(String),

    /// A read command was pointed at the in-process memory backend
    #[error("'{0}' reads entries written by another process and needs --backend file")]
    ReadFromMemory(&'static str),
}

/// bikecast - Seoul public bike occupancy collector and forecast cache
#[derive(Parser, Debug)]
#[command(name = "bikecast")]
#[command(about = "Collects Seoul public bike availability and caches per-station forecasts")]
#[command(version)]
pub struct Cli {
    /// Cache backend, overriding CACHE_BACKEND (memory, file)
    #[arg(long, value_name = "BACKEND", global = true)]
    pub backend: Option<String>,

    /// Directory of the file backend, overriding CACHE_DIR
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// What to do; runs the scheduler when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run collection and forecasting on their intervals until Ctrl-C
    Run {
        /// Trigger one collection pass right after startup
        #[arg(long)]
        collect_on_start: bool,
    },
    /// Run one collection pass now and report what was written
    Collect,
    /// List cached station snapshots
    List {
        /// Maximum number of snapshots to print
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Print the cached snapshot of one station
    Show {
        /// Station id, e.g. ST-1234
        station_id: String,
    },
    /// Print the cached forecast of one station
    Forecast {
        /// Station id, e.g. ST-1234
        station_id: String,
    },
}

impl Command {
    /// Subcommand name as typed on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Command::Run { .. } => "run",
            Command::Collect => "collect",
            Command::List { .. } => "list",
            Command::Show { .. } => "show",
            Command::Forecast { .. } => "forecast",
        }
    }

    /// Whether the command only reads what another process cached
    pub fn reads_cache(&self) -> bool {
        matches!(
            self,
            Command::List { .. } | Command::Show { .. } | Command::Forecast { .. }
        )
    }
}

/// Parses a backend argument into a [`CacheBackend`]
pub fn parse_backend_arg(s: &str) -> Result<CacheBackend, CliError> {
    s.parse()
        .map_err(|_| CliError::InvalidBackend(s.to_string()))
}

impl Cli {
    /// The subcommand to run, defaulting to the scheduler loop
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run {
            collect_on_start: false,
        })
    }

    /// Applies the command-line overrides to `config`
    ///
    /// Read commands default to the file backend since a memory cache is
    /// always empty in a fresh process.
    pub fn apply_to(&self, mut config: Config) -> Result<Config, CliError> {
        let command = self.command();
        match self.backend.as_deref() {
            Some(backend) => {
                config.cache_backend = parse_backend_arg(backend)?;
                if command.reads_cache() && config.cache_backend == CacheBackend::Memory {
                    return Err(CliError::ReadFromMemory(command.name()));
                }
            }
            None if command.reads_cache() => config.cache_backend = CacheBackend::File,
            None => {}
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        Ok(config)
    }
}
