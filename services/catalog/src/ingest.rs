//! Ingestion handler: turns "object created" notifications into catalog upserts.
//!
//! Each notification is handled on its own. A malformed notification is
//! rejected at its position in the batch and a failed upsert is reported with
//! the notification attached so it can be redelivered; neither stops the rest
//! of the batch. Upserting by `doc_id` makes redelivery safe.

use crate::catalog_store::{CatalogStore, StoreError};
use crate::notification::{NotificationError, ObjectCreatedNotification};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Notification batch is empty")]
    EmptyBatch,

    #[error("Shutdown requested with {pending} notifications still pending")]
    Interrupted { pending: usize },
}

/// Result of processing one notification
#[derive(Debug)]
pub enum ItemOutcome {
    /// The record was upserted
    Indexed { doc_id: String },
    /// The notification failed validation and was skipped
    Rejected { error: NotificationError },
    /// The upsert failed; the notification is kept for redelivery
    Failed {
        notification: ObjectCreatedNotification,
        error: StoreError,
    },
}

/// Per-item outcomes of a batch, in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchReport {
    /// True when every item was indexed
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o, ItemOutcome::Indexed { .. }))
    }

    pub fn indexed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Indexed { .. }))
            .count()
    }

    pub fn rejected_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Rejected { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, ItemOutcome::Failed { .. }))
            .count()
    }

    /// Positions and errors of rejected items
    pub fn rejected(&self) -> impl Iterator<Item = (usize, &NotificationError)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| match outcome {
                ItemOutcome::Rejected { error } => Some((index, error)),
                _ => None,
            })
    }

    /// Notifications whose upsert failed with a transient error
    pub fn retryable(&self) -> Vec<ObjectCreatedNotification> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                ItemOutcome::Failed {
                    notification,
                    error,
                } if error.is_transient() => Some(notification.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Applies notification batches to a [`CatalogStore`]
pub struct IngestionHandler {
    store: Arc<dyn CatalogStore>,
    concurrency: usize,
}

impl IngestionHandler {
    pub fn new(store: Arc<dyn CatalogStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Upsert one catalog record per notification.
    #[instrument(skip_all, fields(batch_size = notifications.len()))]
    pub async fn process_batch(
        &self,
        notifications: Vec<ObjectCreatedNotification>,
    ) -> Result<BatchReport, IngestError> {
        if notifications.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        Ok(self.run(notifications.into_iter().map(Ok).collect()).await)
    }

    /// Decode undecoded `s3.object` elements and process them.
    ///
    /// Items that fail decoding are reported as rejected at their position;
    /// the others are upserted as usual.
    #[instrument(skip_all, fields(batch_size = objects.len()))]
    pub async fn process_raw_batch(&self, objects: Vec<Value>) -> Result<BatchReport, IngestError> {
        if objects.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let items = objects
            .iter()
            .map(ObjectCreatedNotification::from_object)
            .collect();

        Ok(self.run(items).await)
    }

    /// Redeliver the transient failures of `report` until none remain.
    ///
    /// There is no attempt limit: a failed upsert is never dropped. The loop
    /// only exits early when `shutdown` fires, leaving the batch uncommitted.
    pub async fn settle(
        &self,
        report: &BatchReport,
        mut backoff: ExponentialBackoff,
        shutdown: &CancellationToken,
    ) -> Result<(), IngestError> {
        let mut pending = report.retryable();
        let mut attempt = 0u32;

        while !pending.is_empty() {
            attempt += 1;
            let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);

            warn!(
                pending = pending.len(),
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying failed catalog upserts"
            );

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Err(IngestError::Interrupted { pending: pending.len() });
                }
                _ = tokio::time::sleep(delay) => {}
            }

            pending = self
                .run(pending.into_iter().map(Ok).collect())
                .await
                .retryable();
        }

        if attempt > 0 {
            info!(attempts = attempt, "Failed catalog upserts recovered");
        }

        Ok(())
    }

    async fn run(
        &self,
        items: Vec<Result<ObjectCreatedNotification, NotificationError>>,
    ) -> BatchReport {
        let started = Instant::now();

        let outcomes: Vec<ItemOutcome> = stream::iter(items)
            .map(|item| self.process_item(item))
            .buffered(self.concurrency)
            .collect()
            .await;

        metrics::histogram!("catalog.ingest.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        BatchReport { outcomes }
    }

    async fn process_item(
        &self,
        item: Result<ObjectCreatedNotification, NotificationError>,
    ) -> ItemOutcome {
        let notification = match item.and_then(|n| n.validate().map(|()| n)) {
            Ok(notification) => notification,
            Err(error) => {
                warn!(error = %error, "Rejecting malformed notification");
                metrics::counter!("catalog.records.rejected").increment(1);
                return ItemOutcome::Rejected { error };
            }
        };

        let record = notification.to_record();

        match self.store.upsert(&record).await {
            Ok(()) => {
                debug!(doc_id = %record.doc_id, size = record.size, "Catalog record indexed");
                metrics::counter!("catalog.records.indexed").increment(1);
                ItemOutcome::Indexed {
                    doc_id: record.doc_id,
                }
            }
            Err(error) => {
                error!(
                    doc_id = %record.doc_id,
                    error = %error,
                    transient = error.is_transient(),
                    "Failed to upsert catalog record"
                );
                metrics::counter!("catalog.records.failed").increment(1);
                ItemOutcome::Failed {
                    notification,
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{InMemoryCatalogStore, MockCatalogStore};
    use crate::record::CatalogRecord;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the first `failures` upserts, then delegates to memory
    struct FlakyStore {
        inner: InMemoryCatalogStore,
        failures: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self {
                inner: InMemoryCatalogStore::new(),
                failures: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CatalogStore for FlakyStore {
        async fn upsert(&self, record: &CatalogRecord) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            self.inner.upsert(record).await
        }

        async fn scan(&self) -> Result<Vec<CatalogRecord>, StoreError> {
            self.inner.scan().await
        }
    }

    fn fast_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reprocessing_is_idempotent() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let handler = IngestionHandler::new(store.clone(), 4);
        let notification = ObjectCreatedNotification::new("D", 42, "etag-d");

        let report = handler.process_batch(vec![notification.clone()]).await.unwrap();
        let once = store.get("D").unwrap();
        assert!(report.is_success());

        for _ in 0..3 {
            handler.process_batch(vec![notification.clone()]).await.unwrap();
        }

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("D").unwrap(), once);
    }

    #[tokio::test]
    async fn test_malformed_item_does_not_abort_batch() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let handler = IngestionHandler::new(store.clone(), 4);

        let report = handler
            .process_raw_batch(vec![
                json!({"key": "a", "size": 1, "eTag": "ta"}),
                json!({"size": 2, "eTag": "tb"}),
                json!({"key": "c", "size": 3, "eTag": "tc"}),
            ])
            .await
            .unwrap();

        assert_eq!(report.indexed_count(), 2);
        assert_eq!(report.rejected_count(), 1);
        assert!(!report.is_success());

        let rejected: Vec<_> = report.rejected().collect();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, 1);
        assert_eq!(rejected[0].1, &NotificationError::MissingField("key"));

        assert!(store.get("a").is_some());
        assert!(store.get("c").is_some());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let handler = IngestionHandler::new(store.clone(), 1);

        handler
            .process_batch(vec![ObjectCreatedNotification::new("x", 10, "t1")])
            .await
            .unwrap();
        handler
            .process_batch(vec![ObjectCreatedNotification::new("x", 20, "t2")])
            .await
            .unwrap();

        let records = store.scan().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 20);
        assert_eq!(records[0].e_tag, "t2");
    }

    #[tokio::test]
    async fn test_store_failure_is_isolated_and_retryable() {
        let mut store = MockCatalogStore::new();
        store.expect_upsert().times(3).returning(|record| {
            if record.doc_id == "b" {
                Err(StoreError::Unavailable("timeout".to_string()))
            } else {
                Ok(())
            }
        });
        let handler = IngestionHandler::new(Arc::new(store), 3);

        let report = handler
            .process_batch(vec![
                ObjectCreatedNotification::new("a", 1, "ta"),
                ObjectCreatedNotification::new("b", 2, "tb"),
                ObjectCreatedNotification::new("c", 3, "tc"),
            ])
            .await
            .unwrap();

        assert_eq!(report.indexed_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert!(matches!(report.outcomes[1], ItemOutcome::Failed { .. }));

        let retry = report.retryable();
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].bucket_key, "b");
    }

    #[tokio::test]
    async fn test_invalid_record_is_not_retried() {
        let mut store = MockCatalogStore::new();
        store
            .expect_upsert()
            .times(1)
            .returning(|_| Err(StoreError::InvalidRecord("size out of range".to_string())));
        let handler = IngestionHandler::new(Arc::new(store), 1);

        let report = handler
            .process_batch(vec![ObjectCreatedNotification::new("big", u64::MAX, "t")])
            .await
            .unwrap();

        assert_eq!(report.failed_count(), 1);
        assert!(report.retryable().is_empty());
    }

    #[tokio::test]
    async fn test_settle_retries_until_indexed() {
        let store = Arc::new(FlakyStore::new(3));
        let handler = IngestionHandler::new(store.clone(), 2);

        let report = handler
            .process_batch(vec![
                ObjectCreatedNotification::new("a", 1, "ta"),
                ObjectCreatedNotification::new("b", 2, "tb"),
            ])
            .await
            .unwrap();
        assert_eq!(report.failed_count(), 2);

        handler
            .settle(&report, fast_backoff(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.inner.len(), 2);
        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_settle_stops_on_shutdown() {
        let store = Arc::new(FlakyStore::new(usize::MAX));
        let handler = IngestionHandler::new(store.clone(), 1);

        let report = handler
            .process_batch(vec![ObjectCreatedNotification::new("a", 1, "ta")])
            .await
            .unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = handler.settle(&report, fast_backoff(), &shutdown).await;
        assert!(matches!(result, Err(IngestError::Interrupted { pending: 1 })));
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let handler = IngestionHandler::new(Arc::new(InMemoryCatalogStore::new()), 1);
        assert!(matches!(
            handler.process_batch(Vec::new()).await,
            Err(IngestError::EmptyBatch)
        ));
        assert!(matches!(
            handler.process_raw_batch(Vec::new()).await,
            Err(IngestError::EmptyBatch)
        ));
    }
}
