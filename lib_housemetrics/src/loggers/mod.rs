//! # Logging Setup
//!
//! Installs the global `tracing` subscriber:
//!
//! - an `EnvFilter` taken from `RUST_LOG`, falling back to the configured level;
//! - a console layer writing `info` and more verbose events to stdout, `warn`
//!   and `error` to stderr;
//! - when a log directory is configured, a JSON layer on a daily rolling file,
//!   written through a non-blocking worker.
//!
//! The returned `WorkerGuard` flushes the file writer when dropped; keep it
//! alive until the process exits.

use std::io;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Where and how much to log.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `lib_housemetrics=debug`.
    pub level: String,
    /// Directory for the rolling JSON log. `None` logs to the console only.
    pub dir: Option<PathBuf>,
    /// File name prefix of the rolling log.
    pub file_prefix: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            file_prefix: "housemetrics".to_string(),
        }
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn setup_logging(opts: &LoggingOptions) -> io::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&opts.level))
        .map_err(io::Error::other)?;

    let console_layer = fmt::layer()
        .with_target(true)
        .with_writer(io::stderr.with_max_level(Level::WARN).or_else(io::stdout));

    let (file_layer, guard) = match &opts.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = rolling::daily(dir, &opts.file_prefix);
            let (writer, guard) = non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(io::Error::other)?;

    info!(level = %opts.level, dir = ?opts.dir, "logging initialized");
    Ok(guard)
}
