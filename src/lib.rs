//! Seoul public bike occupancy collector
//!
//! Periodically pulls station availability from the Seoul open data API,
//! caches per-station snapshots with a TTL, and derives per-station forecasts
//! from whatever snapshots are cached.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod forecast;
pub mod jobs;
pub mod query;
pub mod scheduler;
