//! # Aqua Ingest
//!
//! Reads newline-delimited telemetry frames from a serial LoRa receiver,
//! stores each one, and serves the stored history over HTTP.

use anyhow::{Context, Result};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aqua_ingest::api::{self, ApiState};
use aqua_ingest::config::Config;
use aqua_ingest::error::IngestError;
use aqua_ingest::ingest::{spawn_ingestion, IngestStats, IngestionLoop};
use aqua_ingest::{logging, store};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main entry point
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (file, then `SERIAL_PORT`/`BAUD_RATE`/`DATABASE_URL`/`BIND_ADDR`)
///    - Set up logging
///    - Open the record store
///
/// 2. **Run**
///    - Spawn the serial ingestion loop if a port is configured
///    - Serve the query API
///
/// 3. **Graceful Shutdown**
///    - Ctrl+C cancels both; the serial port is released
///    - Log ingestion counters
///
/// # Examples
///
/// ```bash
/// SERIAL_PORT=/dev/ttyUSB0 cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    let _log_guard = logging::init(&config.logging)?;
    info!("Aqua Ingest v{} starting...", env!("CARGO_PKG_VERSION"));

    let store = store::open_store(&config.storage.database_url)
        .with_context(|| format!("failed to open record store {}", config.storage.database_url))?;
    let shutdown = CancellationToken::new();

    let ingestion = match IngestionLoop::serial(&config.serial, store.clone()) {
        Ok(ingestion) => Some(spawn_ingestion(ingestion, shutdown.clone())),
        Err(IngestError::ConfigurationMissing(reason)) => {
            warn!("Serial ingestion disabled: {}", reason);
            None
        }
        Err(e) => return Err(e.into()),
    };

    let listener = api::bind(&config.api.bind_addr).await?;
    let state = Arc::new(ApiState::new(store, &config.api));
    let server = tokio::spawn(api::serve(listener, state, shutdown.clone()));

    info!("Press Ctrl+C to exit");
    run_until_shutdown(tokio::signal::ctrl_c(), server, ingestion, shutdown).await
}

/// Wait for `signal` or an API exit, then cancel `shutdown` and drain both
/// tasks. The token is always cancelled before any error is returned.
async fn run_until_shutdown<F>(
    signal: F,
    mut server: JoinHandle<aqua_ingest::error::Result<()>>,
    ingestion: Option<JoinHandle<IngestStats>>,
    shutdown: CancellationToken,
) -> Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    let (finished, signal_result) = tokio::select! {
        signal = signal => {
            match &signal {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}; shutting down...", e),
            }
            (None, signal)
        }
        result = &mut server => {
            warn!("Query API exited, shutting down...");
            (Some(result), Ok(()))
        }
    };
    shutdown.cancel();

    let server_result = match finished {
        Some(result) => result,
        None => server.await,
    };

    if let Some(handle) = ingestion {
        let stats = handle.await?;
        info!(
            "Total frames stored: {} ({} dropped on store failures, {} link failures, {} source errors)",
            stats.frames_stored, stats.store_failures, stats.link_failures, stats.source_errors
        );
    }

    signal_result.context("failed to listen for Ctrl+C")?;
    server_result??;
    Ok(())
}
