//! Catalog store contract and the in-memory backend.
//!
//! The catalog is a keyed store with two primitives: insert-or-overwrite by
//! `doc_id` and a full scan. Last write for a key wins; there is no delete.

use crate::record::CatalogRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

/// Catalog store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed the request. Retryable.
    #[error("Catalog store unavailable: {0}")]
    Unavailable(String),

    /// The record violates the catalog schema. Not retryable.
    #[error("Invalid catalog record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Durable keyed store holding one [`CatalogRecord`] per blob store key.
///
/// Implementations must be thread-safe; handlers share one instance per
/// process behind an `Arc`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert the record, or overwrite the one stored under the same `doc_id`.
    async fn upsert(&self, record: &CatalogRecord) -> Result<(), StoreError>;

    /// Return every record in the store, in no particular order.
    async fn scan(&self) -> Result<Vec<CatalogRecord>, StoreError>;

    /// Cheap connectivity probe used by the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-memory [`CatalogStore`].
///
/// Records live in a `HashMap` behind a `RwLock` and are lost on drop.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    records: RwLock<HashMap<String, CatalogRecord>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a single record
    pub fn get(&self, doc_id: &str) -> Option<CatalogRecord> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(doc_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn upsert(&self, record: &CatalogRecord) -> Result<(), StoreError> {
        if record.doc_id.is_empty() {
            return Err(StoreError::InvalidRecord("docId must not be empty".to_string()));
        }

        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        records.insert(record.doc_id.clone(), record.clone());
        Ok(())
    }

    async fn scan(&self) -> Result<Vec<CatalogRecord>, StoreError> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))?;
        let mut result: Vec<CatalogRecord> = records.values().cloned().collect();
        result.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
        Ok(result)
    }
}
