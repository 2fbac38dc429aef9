//! In-memory record store for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{PersistenceError, RecordStore};
use crate::domain::market_data::MarketRecord;

/// In-memory implementation of `RecordStore`, keyed by document id.
///
/// Suitable for testing and development. Not for production use.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, MarketRecord>>,
    writes: RwLock<u64>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct records stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Total writes accepted, including overwrites.
    #[must_use]
    pub fn writes(&self) -> u64 {
        *self.writes.read()
    }

    /// Record stored under `document_id`.
    #[must_use]
    pub fn get(&self, document_id: &str) -> Option<MarketRecord> {
        self.records.read().get(document_id).cloned()
    }

    /// All stored records, sorted by timestamp.
    #[must_use]
    pub fn records(&self) -> Vec<MarketRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn write(&self, record: &MarketRecord) -> Result<(), PersistenceError> {
        self.records
            .write()
            .insert(record.key().document_id(), record.clone());
        *self.writes.write() += 1;
        Ok(())
    }
}
