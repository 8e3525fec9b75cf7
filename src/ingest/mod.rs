//! # Ingestion Loop
//!
//! Supervises a [`FrameSource`] and writes every frame it yields to the
//! record store.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reading <-> Storing
//!       ^              |                        |
//!       +--- cooldown -+------- LinkLost -------+
//!
//! any state -> ShuttingDown (cancellation)
//! ```
//!
//! Link faults and store faults are separate failure domains: a lost link
//! triggers a reconnect after the cooldown, a failed append drops that one
//! frame and reading continues on the same link. Nothing here is fatal to
//! the process.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SerialConfig;
use crate::error::Result;
use crate::frame::{Frame, FrameSource, SerialFrameSource};
use crate::record::to_storage_precision;
use crate::serial::ReconnectPolicy;
use crate::store::SharedStore;

/// Number of stored frames between status log messages
const LOG_INTERVAL_FRAMES: u64 = 100;

/// Longest payload excerpt written to the log per frame
const LOG_PREVIEW_CHARS: usize = 80;

/// Supervisory state of the ingestion loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Disconnected,
    Connecting,
    Connected,
    Reading,
    Storing,
    ShuttingDown,
}

/// Counters reported when the loop stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames_stored: u64,
    pub store_failures: u64,
    pub link_failures: u64,
    /// Source failures outside the link domain; also followed by a reconnect
    pub source_errors: u64,
    pub connects: u64,
}

/// How a read session on one connection ended
enum SessionEnd {
    LinkLost,
    Cancelled,
}

/// The ingestion state machine
pub struct IngestionLoop<S: FrameSource> {
    source: S,
    store: SharedStore,
    policy: ReconnectPolicy,
    poll_interval: Duration,
    state: watch::Sender<IngestState>,
    stats: IngestStats,
    last_timestamp: Option<DateTime<Utc>>,
}

impl IngestionLoop<SerialFrameSource> {
    /// Build the loop for the configured serial device
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationMissing` if no serial port is configured
    pub fn serial(config: &SerialConfig, store: SharedStore) -> Result<Self> {
        let source = SerialFrameSource::from_config(config)?;
        Ok(Self::new(
            source,
            store,
            ReconnectPolicy::fixed(config.reconnect_interval()),
            config.poll_interval(),
        ))
    }
}

impl<S: FrameSource> IngestionLoop<S> {
    pub fn new(source: S, store: SharedStore, policy: ReconnectPolicy, poll_interval: Duration) -> Self {
        let (state, _) = watch::channel(IngestState::Disconnected);
        Self {
            source,
            store,
            policy,
            poll_interval,
            state,
            stats: IngestStats::default(),
            last_timestamp: None,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<IngestState> {
        self.state.subscribe()
    }

    /// Run until `cancel` fires, then release the source and report counters
    pub async fn run(mut self, cancel: CancellationToken) -> IngestStats {
        info!("Ingestion loop starting on {}", self.source.describe());

        while !cancel.is_cancelled() {
            self.transition(IngestState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                connected = self.source.connect() => connected,
            };

            match connected {
                Ok(()) => {
                    self.stats.connects += 1;
                    self.transition(IngestState::Connected);
                    if let SessionEnd::Cancelled = self.read_session(&cancel).await {
                        break;
                    }
                }
                Err(e) => warn!(
                    "Could not connect to {}: {}; retrying in {:?}",
                    self.source.describe(),
                    e,
                    self.policy.cooldown()
                ),
            }

            self.transition(IngestState::Disconnected);
            if !self.policy.wait(&cancel).await {
                break;
            }
        }

        self.source.disconnect();
        self.transition(IngestState::ShuttingDown);
        info!(
            "Ingestion loop stopped: {} frames stored, {} store failures, {} link failures, {} source errors, {} connects",
            self.stats.frames_stored,
            self.stats.store_failures,
            self.stats.link_failures,
            self.stats.source_errors,
            self.stats.connects
        );
        self.stats
    }

    /// Read and store frames until the link drops or cancellation
    async fn read_session(&mut self, cancel: &CancellationToken) -> SessionEnd {
        loop {
            if cancel.is_cancelled() {
                return SessionEnd::Cancelled;
            }
            self.transition(IngestState::Reading);

            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                polled = self.source.next_frame() => polled,
            };

            match polled {
                Ok(Some(frame)) => {
                    self.transition(IngestState::Storing);
                    // An append already started runs to completion
                    self.store_frame(frame).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return SessionEnd::Cancelled,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) if e.is_link_fault() => {
                    self.stats.link_failures += 1;
                    warn!("{}; reconnecting in {:?}", e, self.policy.cooldown());
                    return SessionEnd::LinkLost;
                }
                Err(e) => {
                    self.stats.source_errors += 1;
                    error!(
                        "{} failed: {}; reconnecting in {:?}",
                        self.source.describe(),
                        e,
                        self.policy.cooldown()
                    );
                    self.source.disconnect();
                    return SessionEnd::LinkLost;
                }
            }
        }
    }

    async fn store_frame(&mut self, frame: Frame) {
        let record = frame.into_record(self.next_timestamp());
        let preview = preview(record.payload.as_deref().unwrap_or(""));

        match self.store.append(record).await {
            Ok(id) => {
                self.stats.frames_stored += 1;
                debug!("Stored frame #{}: {}", id, preview);
                if self.stats.frames_stored % LOG_INTERVAL_FRAMES == 0 {
                    info!("Stored {} frames", self.stats.frames_stored);
                }
            }
            Err(e) => {
                self.stats.store_failures += 1;
                warn!("Dropping frame '{}': {}", preview, e);
            }
        }
    }

    /// Capture time for the next record, never earlier than the previous one
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = to_storage_precision(Utc::now());
        let stamp = match self.last_timestamp {
            Some(prev) if now < prev => prev,
            _ => now,
        };
        self.last_timestamp = Some(stamp);
        stamp
    }

    fn transition(&self, next: IngestState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            match next {
                IngestState::Reading | IngestState::Storing => {}
                _ => debug!("Ingestion state {:?} -> {:?}", prev, next),
            }
        }
    }
}

fn preview(payload: &str) -> String {
    if payload.chars().count() <= LOG_PREVIEW_CHARS {
        payload.to_string()
    } else {
        let head: String = payload.chars().take(LOG_PREVIEW_CHARS).collect();
        format!("{}...", head)
    }
}

/// Run the loop on its own task
pub fn spawn_ingestion<S>(ingestion: IngestionLoop<S>, cancel: CancellationToken) -> JoinHandle<IngestStats>
where
    S: FrameSource + 'static,
{
    tokio::spawn(ingestion.run(cancel))
}
