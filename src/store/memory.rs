//! In-memory record store.
//!
//! Same ordering and paging semantics as the SQLite store; nothing survives
//! the process.

use async_trait::async_trait;
use std::sync::RwLock;

use super::{RecordStore, MAX_PAGE_LIMIT};
use crate::error::{IngestError, Result};
use crate::record::{to_storage_precision, FrameRecord, NewFrameRecord};

/// Record store backed by a vector in insertion (id) order
///
/// # Examples
///
/// ```
/// use aqua_ingest::record::NewFrameRecord;
/// use aqua_ingest::store::{MemoryStore, RecordStore};
///
/// # tokio_test::block_on(async {
/// let store = MemoryStore::new();
/// let id = store.append(NewFrameRecord::raw("T=21.5", chrono::Utc::now())).await.unwrap();
/// assert_eq!(store.latest().await.unwrap().unwrap().id, id);
/// # })
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<FrameRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order
    pub fn snapshot(&self) -> Vec<FrameRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }

    fn newest_first(&self) -> Result<Vec<FrameRecord>> {
        let records = self.records.read().map_err(poisoned)?;
        let mut sorted = records.clone();
        drop(records);
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        Ok(sorted)
    }
}

fn poisoned<T>(_: T) -> IngestError {
    IngestError::StoreUnavailable("memory store lock poisoned".to_string())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn append(&self, mut record: NewFrameRecord) -> Result<i64> {
        record.timestamp = to_storage_precision(record.timestamp);
        let mut records = self.records.write().map_err(poisoned)?;
        let id = records.last().map_or(1, |last| last.id + 1);
        records.push(record.with_id(id));
        Ok(id)
    }

    async fn list_recent(&self, skip: u64, limit: u32) -> Result<Vec<FrameRecord>> {
        let limit = limit.min(MAX_PAGE_LIMIT) as usize;
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);
        Ok(self.newest_first()?.into_iter().skip(skip).take(limit).collect())
    }

    async fn latest(&self) -> Result<Option<FrameRecord>> {
        Ok(self.newest_first()?.into_iter().next())
    }
}
