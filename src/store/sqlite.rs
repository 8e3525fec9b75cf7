//! SQLite-backed record store.
//!
//! One connection is shared behind a mutex; blocking SQLite calls are moved
//! off the async executor with `spawn_blocking`.

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use super::{RecordStore, MAX_PAGE_LIMIT};
use crate::error::{IngestError, Result};
use crate::record::{FrameRecord, NewFrameRecord, SensorReadings};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS lora_data (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id   TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,
    temperature REAL,
    turbidity   REAL,
    ph          REAL,
    image_ref   TEXT,
    payload     TEXT
);
CREATE INDEX IF NOT EXISTS ix_lora_data_device_id ON lora_data (device_id);
CREATE INDEX IF NOT EXISTS ix_lora_data_recency ON lora_data (timestamp DESC, id DESC);
";

const SELECT_COLUMNS: &str =
    "SELECT id, device_id, timestamp, temperature, turbidity, ph, image_ref, payload FROM lora_data";

/// How long a writer waits on a locked database before failing the append
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable record store on a SQLite database
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (creating if needed) a file-backed database in WAL mode
    ///
    /// # Errors
    ///
    /// Returns `StoreUnavailable` if the file cannot be opened or the schema
    /// cannot be created
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        info!("Opened SQLite store at {} (journal_mode={})", path.display(), mode);
        Self::init(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        debug!("Opened in-memory SQLite store");
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| IngestError::StoreUnavailable("connection mutex poisoned".to_string()))
    }

    fn append_blocking(&self, record: &NewFrameRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO lora_data (device_id, timestamp, temperature, turbidity, ph, image_ref, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.device_id,
                record.timestamp.timestamp_micros(),
                record.readings.temperature,
                record.readings.turbidity,
                record.readings.ph,
                record.readings.image_ref,
                record.payload,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_recent_blocking(&self, skip: u64, limit: u32) -> Result<Vec<FrameRecord>> {
        let limit = limit.min(MAX_PAGE_LIMIT);
        if limit == 0 {
            return Ok(Vec::new());
        }
        let skip = i64::try_from(skip).unwrap_or(i64::MAX);

        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} ORDER BY timestamp DESC, id DESC LIMIT ?1 OFFSET ?2",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit, skip], row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn latest_blocking(&self) -> Result<Option<FrameRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("{} ORDER BY timestamp DESC, id DESC LIMIT 1", SELECT_COLUMNS),
                [],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FrameRecord> {
    let micros: i64 = row.get(2)?;
    let timestamp = DateTime::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, micros))?;

    Ok(FrameRecord {
        id: row.get(0)?,
        device_id: row.get(1)?,
        timestamp,
        readings: SensorReadings {
            temperature: row.get(3)?,
            turbidity: row.get(4)?,
            ph: row.get(5)?,
            image_ref: row.get(6)?,
        },
        payload: row.get(7)?,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn append(&self, record: NewFrameRecord) -> Result<i64> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.append_blocking(&record)).await?
    }

    async fn list_recent(&self, skip: u64, limit: u32) -> Result<Vec<FrameRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list_recent_blocking(skip, limit)).await?
    }

    async fn latest(&self) -> Result<Option<FrameRecord>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.latest_blocking()).await?
    }
}
