//! # Logging
//!
//! `tracing` subscriber setup: stdout always, plus a daily rolling file when
//! `logging.log_dir` is set. `RUST_LOG` takes precedence over the configured
//! level.

use serde::de::Error;
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{IngestError, Result};

/// File name prefix for rolling log files
pub const LOG_FILE_PREFIX: &str = "aqua-ingest.log";

/// Build the level filter from `RUST_LOG` or the configured level
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            IngestError::Config(toml::de::Error::custom(format!(
                "invalid log level '{}': {}",
                config.level, e
            )))
        }),
    }
}

/// Install the global subscriber
///
/// Hold the returned guard for the life of the process so buffered file
/// output is flushed on exit.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    if config.log_dir.is_empty() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .map_err(|e| IngestError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(|e| IngestError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

    Ok(Some(guard))
}
