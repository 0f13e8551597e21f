//! # Configuration Module
//!
//! One `clap` model for the whole server. Every flag can also be given as an
//! environment variable, and a `.env` file in the working directory is
//! loaded first, so the usual deployment is a plain env file.
//!
//! ## Contained Modules:
//! - **`sources`**: the flag group of each polled source.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::endpoints::WebhookSettings;
use crate::loggers::LoggingOptions;
use crate::store::InfluxSettings;
use crate::utils::parse_duration;

/// Per-source flag groups.
pub mod sources;

pub use sources::{AmbientWeatherArgs, AwairArgs, FlumeArgs, ParticleArgs, PurpleAirArgs};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not load .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),

    #[error("bad awair device `{0}`, expected 'name:type:id'")]
    InvalidDevice(String),
}

/// Which sink points go to.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// InfluxDB v2 HTTP API.
    Influxdb,
    /// The log, at `info`.
    Log,
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "housemetrics", about = "Collects home sensor readings into a time-series store.", version)]
pub struct Config {
    #[clap(long, env = "HTTP_ADDR", default_value = "0.0.0.0:7777", help = "Webhook listen address.")]
    pub http_addr: SocketAddr,

    #[clap(long, env = "LOG_LEVEL", default_value = "info", help = "Log filter used when RUST_LOG is unset.")]
    pub log_level: String,

    #[clap(long, env = "LOG_DIR", help = "Directory for the rolling JSON log; console only when unset.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "STORE", value_enum, default_value = "influxdb", help = "Where points are written.")]
    pub store: StoreKind,

    #[clap(long, env = "COOLDOWN", default_value = "1m", value_parser = parse_duration, help = "Pause after an upstream rejects a request.")]
    pub cooldown: Duration,

    #[clap(long, env = "INFLUXDB_DEST", default_value = "", help = "InfluxDB address.")]
    pub influxdb_dest: String,

    #[clap(long, env = "INFLUXDB_BUCKET", default_value = "", help = "InfluxDB bucket.")]
    pub influxdb_bucket: String,

    #[clap(long, env = "INFLUXDB_TOKEN", default_value = "", hide_env_values = true, help = "InfluxDB auth token.")]
    pub influxdb_token: String,

    #[clap(long, env = "INFLUXDB_ORG", default_value = "", help = "InfluxDB organization.")]
    pub influxdb_org: String,

    #[clap(long, env = "RACHIO_EXTERNAL_ID", default_value = "", hide_env_values = true, help = "External ID sent with Rachio events.")]
    pub rachio_external_id: String,

    #[clap(long, env = "PURPLEAIR_HEADER_NAME", default_value = "", help = "Header PurpleAir uploads must carry.")]
    pub purpleair_header_name: String,

    #[clap(long, env = "PURPLEAIR_HEADER_VALUE", default_value = "", hide_env_values = true, help = "Expected value of that header.")]
    pub purpleair_header_value: String,

    #[clap(flatten)]
    pub awair: AwairArgs,

    #[clap(flatten)]
    pub ambient_weather: AmbientWeatherArgs,

    #[clap(flatten)]
    pub flume: FlumeArgs,

    #[clap(flatten)]
    pub purpleair: PurpleAirArgs,

    #[clap(flatten)]
    pub particle: ParticleArgs,
}

impl Config {
    /// Loads `.env` (if present), then parses flags and environment.
    /// Exits with usage on malformed flags, as `clap` does.
    pub fn load() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => {}
            Err(e) if e.not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Checks what `clap` cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.awair.enabled {
            if let Some(bad) = self
                .awair
                .devices
                .iter()
                .find(|d| d.split(':').count() != 3)
            {
                return Err(ConfigError::InvalidDevice(bad.clone()));
            }
        }
        Ok(())
    }

    pub fn logging(&self) -> LoggingOptions {
        LoggingOptions {
            level: self.log_level.clone(),
            dir: self.log_dir.clone(),
            ..LoggingOptions::default()
        }
    }

    pub fn influx(&self) -> InfluxSettings {
        InfluxSettings {
            dest: self.influxdb_dest.clone(),
            bucket: self.influxdb_bucket.clone(),
            token: self.influxdb_token.clone(),
            org: self.influxdb_org.clone(),
        }
    }

    pub fn webhooks(&self) -> WebhookSettings {
        WebhookSettings {
            rachio_external_id: self.rachio_external_id.clone(),
            purpleair_header_name: self.purpleair_header_name.clone(),
            purpleair_header_value: self.purpleair_header_value.clone(),
        }
    }
}
