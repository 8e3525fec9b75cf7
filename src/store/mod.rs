//! # Record Store Module
//!
//! Durable, queryable persistence for frame records.
//!
//! This module handles:
//! - Appending records written by the single ingestion writer
//! - Listing records newest-first with skip/limit pagination
//! - Looking up the latest record
//! - Resolving a connection string to a concrete store
//!
//! Ordering is always `timestamp` descending with ties broken by `id`
//! descending.

use async_trait::async_trait;
use serde::de::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::error::{IngestError, Result};
use crate::record::{FrameRecord, NewFrameRecord};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Largest page `list_recent` will return
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Shared handle to a record store
pub type SharedStore = Arc<dyn RecordStore>;

/// Append-only record persistence
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a record and return its assigned id
    async fn append(&self, record: NewFrameRecord) -> Result<i64>;

    /// Records newest first, skipping `skip` and returning at most `limit`
    /// (clamped to [`MAX_PAGE_LIMIT`])
    async fn list_recent(&self, skip: u64, limit: u32) -> Result<Vec<FrameRecord>>;

    /// The newest record, or `None` when the store is empty
    async fn latest(&self) -> Result<Option<FrameRecord>>;
}

/// Where records live, parsed from a connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Process-local store without persistence (`memory://`)
    Memory,
    /// In-memory SQLite database (`sqlite://`, `sqlite::memory:`)
    SqliteMemory,
    /// File-backed SQLite database (`sqlite:///<path>` or `sqlite://<path>`)
    SqliteFile(PathBuf),
}

impl StoreLocation {
    /// Parse a connection string
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Config` for unsupported schemes or an empty path
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        match url {
            "memory://" => return Ok(StoreLocation::Memory),
            "sqlite://" | "sqlite::memory:" | "sqlite:///:memory:" => {
                return Ok(StoreLocation::SqliteMemory)
            }
            _ => {}
        }

        let path = url
            .strip_prefix("sqlite:///")
            .or_else(|| url.strip_prefix("sqlite://"));
        match path {
            Some(path) if !path.is_empty() => Ok(StoreLocation::SqliteFile(PathBuf::from(path))),
            _ => Err(IngestError::Config(toml::de::Error::custom(format!(
                "unsupported database_url '{}' (expected sqlite:///<path>, sqlite::memory: or memory://)",
                url
            )))),
        }
    }
}

/// Open the store named by a connection string
///
/// # Examples
///
/// ```no_run
/// use aqua_ingest::store::open_store;
///
/// let store = open_store("sqlite:///./lora_data.db")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open_store(url: &str) -> Result<SharedStore> {
    let store: SharedStore = match StoreLocation::parse(url)? {
        StoreLocation::Memory => Arc::new(MemoryStore::new()),
        StoreLocation::SqliteMemory => Arc::new(SqliteStore::open_in_memory()?),
        StoreLocation::SqliteFile(path) => Arc::new(SqliteStore::open(path)?),
    };
    info!("Record store ready ({})", url);
    Ok(store)
}
