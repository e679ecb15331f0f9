//! Rental server: configuration and process wiring.
//!
//! The binary loads [`Config`] from the environment, connects to `PostgreSQL`,
//! and runs three things until Ctrl+C or SIGTERM:
//!
//! - the HTTP API from `rental-web`
//! - a Prometheus scrape endpoint at `GET /metrics`
//! - the expiry sweeper, every `EXPIRY_SWEEP_INTERVAL_SECS`

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]

pub mod app;
pub mod config;

pub use app::run;
pub use config::{Config, ConfigError};
