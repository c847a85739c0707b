//! Nier Catalog Service
//!
//! Document catalog for the Nier platform. Converted documents uploaded to the
//! document bucket produce bucket notifications; this service indexes each
//! created object (key, size, ETag) in a keyed catalog store and serves the
//! catalog over HTTP.
//!
//! ## Features
//!
//! - **Idempotent ingestion**: one upsert per notification keyed by the object
//!   key, so redelivered or duplicated notifications converge to one record
//! - **Per-item isolation**: malformed notifications are rejected and failed
//!   upserts retried without holding back the rest of a batch
//! - **Redirect-based retrieval**: documents are fetched through a signed URL,
//!   never proxied through the service
//!
//! ## Architecture
//!
//! ```text
//! S3 Bucket                  Kafka Topic               PostgreSQL
//! ┌──────────────┐          ┌──────────────┐          ┌──────────────┐
//! │ documents    │─────────▶│ bucket       │          │ catalog      │
//! │              │  notify  │ notifications│          │ table        │
//! └──────────────┘          └──────────────┘          └──────────────┘
//!        ▲                         │                         ▲
//!        │                         ▼                         │
//!        │                  ┌──────────────┐                 │
//!        │                  │ Ingestion    │─────────────────┤ upsert
//!        │                  │ Handler      │                 │
//!        │                  └──────────────┘                 │
//!        │ presign                                           │ scan
//!        │                  ┌──────────────┐                 │
//!        └──────────────────│ Catalog      │─────────────────┘
//!                           │ Read API     │
//!                           └──────────────┘
//! ```

pub mod api;
pub mod blob_store;
pub mod catalog_store;
pub mod config;
pub mod ingest;
pub mod kafka_consumer;
pub mod notification;
pub mod pg_store;
pub mod record;
pub mod s3_store;

pub use api::{create_probe_router, create_router, get_document, list_documents, AppState, Retrieval};
pub use blob_store::{BlobError, BlobStore, SignedUrl};
pub use catalog_store::{CatalogStore, InMemoryCatalogStore, StoreError};
pub use config::Config;
pub use ingest::{BatchReport, IngestError, IngestionHandler, ItemOutcome};
pub use kafka_consumer::{MessageOutcome, NotificationConsumer, NotificationProcessor};
pub use notification::{NotificationError, ObjectCreatedNotification};
pub use pg_store::PgCatalogStore;
pub use record::{CatalogEntry, CatalogRecord};
pub use s3_store::S3BlobStore;
