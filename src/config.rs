//! Configuration loader: `.env.local` / `.env` files plus environment variables
//!
//! Every setting has a default, so an empty environment yields a working
//! configuration. All problems found are reported together.

use chrono::FixedOffset;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::data::source::SEOUL_API_BASE_URL;
use crate::data::FetchSettings;
use crate::scheduler::ScheduleConfig;

/// Key accepted by the source for low-volume trial requests
pub const SAMPLE_API_KEY: &str = "sample";

/// Errors found while reading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more settings are malformed or out of range
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Where cache entries are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    File,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(CacheBackend::Memory),
            "file" | "disk" => Ok(CacheBackend::File),
            other => Err(format!("unknown cache backend '{other}' (expected memory or file)")),
        }
    }
}

/// Full runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Source API credential
    pub api_key: String,
    pub api_base_url: String,
    pub fetch: FetchSettings,
    /// Timeout of each window request
    pub request_timeout: Duration,
    pub schedule: ScheduleConfig,
    /// TTL of both snapshots and forecasts
    pub cache_ttl: Duration,
    pub forecast_horizon: Duration,
    /// Substring a station name must contain to be collected
    pub station_marker: String,
    /// Offset used to stamp collection times
    pub timezone: FixedOffset,
    pub cache_backend: CacheBackend,
    /// Directory for the file backend; `None` means the XDG cache dir
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: SAMPLE_API_KEY.to_string(),
            api_base_url: SEOUL_API_BASE_URL.to_string(),
            fetch: FetchSettings::default(),
            request_timeout: Duration::from_secs(10),
            schedule: ScheduleConfig::default(),
            cache_ttl: Duration::from_secs(3600),
            forecast_horizon: Duration::from_secs(10 * 60),
            station_marker: "역".to_string(),
            timezone: kst(),
            cache_backend: CacheBackend::File,
            cache_dir: None,
        }
    }
}

fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("UTC+9 is a valid offset")
}

/// Reads variables through a lookup function, remembering every problem
struct EnvReader<F> {
    lookup: F,
    issues: Vec<String>,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parse<T: FromStr>(&mut self, name: &str, default: T, expected: &str) -> T {
        match self.raw(name) {
            None => default,
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    self.issues
                        .push(format!("{name} must be {expected}, got '{raw}'"));
                    default
                }
            },
        }
    }

    fn seconds_f64(&mut self, name: &str, default: Duration) -> Duration {
        let secs = self.parse(name, default.as_secs_f64(), "a number of seconds >= 0");
        match Duration::try_from_secs_f64(secs) {
            Ok(duration) => duration,
            Err(_) => {
                self.issues
                    .push(format!("{name} must be a number of seconds >= 0"));
                default
            }
        }
    }

    fn minutes(&mut self, name: &str, default: Duration) -> Duration {
        let minutes = self.parse(name, default.as_secs() / 60, "a whole number of minutes");
        Duration::from_secs(minutes.saturating_mul(60))
    }
}

impl Config {
    /// Loads `.env.local` and `.env` if present, then reads the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from `lookup`, defaulting absent variables
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let mut env = EnvReader {
            lookup,
            issues: Vec::new(),
        };

        let api_key = env.raw("SEOUL_API_KEY").unwrap_or(defaults.api_key);
        let api_base_url = env.raw("SEOUL_API_BASE_URL").unwrap_or(defaults.api_base_url);

        let fetch = FetchSettings {
            page_size: env.parse(
                "COLLECT_PAGE_SIZE",
                defaults.fetch.page_size,
                "a positive integer",
            ),
            max_start: env.parse(
                "COLLECT_MAX_END",
                defaults.fetch.max_start,
                "a positive integer",
            ),
            delay: env.seconds_f64("COLLECT_SLEEP_SEC", defaults.fetch.delay),
        };
        let request_timeout = env.seconds_f64("COLLECT_TIMEOUT_SEC", defaults.request_timeout);

        let schedule = ScheduleConfig {
            collect_interval: env.minutes("COLLECT_INTERVAL_MIN", defaults.schedule.collect_interval),
            forecast_interval: env.minutes("PREDICT_INTERVAL_MIN", defaults.schedule.forecast_interval),
        };

        let cache_ttl = Duration::from_secs(env.parse(
            "REDIS_TTL_SEC",
            defaults.cache_ttl.as_secs(),
            "a whole number of seconds",
        ));
        let forecast_horizon = env.minutes("FORECAST_HORIZON_MIN", defaults.forecast_horizon);
        let station_marker = env
            .raw("STATION_NAME_MARKER")
            .unwrap_or(defaults.station_marker);

        let offset_hours: i32 = env.parse("COLLECT_TZ_OFFSET_HOURS", 9, "an integer hour offset");
        let timezone = offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                env.issues.push(format!(
                    "COLLECT_TZ_OFFSET_HOURS must be between -23 and 23, got {offset_hours}"
                ));
                defaults.timezone
            });

        let cache_backend = match env.raw("CACHE_BACKEND") {
            None => defaults.cache_backend,
            Some(raw) => raw.parse::<CacheBackend>().unwrap_or_else(|issue| {
                env.issues.push(format!("CACHE_BACKEND: {issue}"));
                defaults.cache_backend
            }),
        };
        let cache_dir = env.raw("CACHE_DIR").map(PathBuf::from);

        let config = Config {
            api_key,
            api_base_url,
            fetch,
            request_timeout,
            schedule,
            cache_ttl,
            forecast_horizon,
            station_marker,
            timezone,
            cache_backend,
            cache_dir,
        };

        let mut issues = env.issues;
        issues.extend(config.validate());
        if issues.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(issues))
        }
    }

    fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.fetch.page_size == 0 {
            issues.push("COLLECT_PAGE_SIZE must be > 0".into());
        }
        if self.fetch.max_start == 0 {
            issues.push("COLLECT_MAX_END must be > 0".into());
        }
        if self.request_timeout.is_zero() {
            issues.push("COLLECT_TIMEOUT_SEC must be > 0".into());
        }
        if self.schedule.collect_interval.is_zero() {
            issues.push("COLLECT_INTERVAL_MIN must be > 0".into());
        }
        if self.schedule.forecast_interval.is_zero() {
            issues.push("PREDICT_INTERVAL_MIN must be > 0".into());
        }
        if self.cache_ttl.is_zero() {
            issues.push("REDIS_TTL_SEC must be > 0".into());
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            issues.push("SEOUL_API_BASE_URL must be an http(s) URL".into());
        }

        issues
    }

    /// Whether the trial key is in use
    pub fn uses_sample_key(&self) -> bool {
        self.api_key == SAMPLE_API_KEY
    }
}
