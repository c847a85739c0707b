use crate::catalog_store::{CatalogStore, StoreError};
use crate::config::CatalogConfig;
use crate::record::CatalogRecord;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Catalog row as stored in PostgreSQL
#[derive(Debug, FromRow)]
struct CatalogRow {
    doc_id: String,
    key: String,
    e_tag: String,
    size: i64,
    extra: Json<BTreeMap<String, Value>>,
}

impl TryFrom<CatalogRow> for CatalogRecord {
    type Error = StoreError;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        let size = u64::try_from(row.size).map_err(|_| {
            StoreError::InvalidRecord(format!("negative size {} for {}", row.size, row.doc_id))
        })?;

        Ok(CatalogRecord {
            doc_id: row.doc_id,
            key: row.key,
            e_tag: row.e_tag,
            size,
            extra: row.extra.0,
        })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// [`CatalogStore`] backed by a single PostgreSQL table keyed by `doc_id`
pub struct PgCatalogStore {
    pool: PgPool,
    table: String,
}

impl PgCatalogStore {
    /// Create a new catalog store with connection pool.
    ///
    /// `config.table` must already be validated as a plain identifier.
    pub async fn new(config: &CatalogConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.database_url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(table = %config.table, "Connected to catalog database");

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Create the catalog table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<()> {
        info!(table = %self.table, "Ensuring catalog schema");

        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .context("Failed to create catalog table")?;

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self, record), fields(doc_id = %record.doc_id))]
    async fn upsert(&self, record: &CatalogRecord) -> Result<(), StoreError> {
        if record.doc_id.is_empty() {
            return Err(StoreError::InvalidRecord("docId must not be empty".to_string()));
        }
        let size = i64::try_from(record.size).map_err(|_| {
            StoreError::InvalidRecord(format!("size {} exceeds bigint range", record.size))
        })?;

        sqlx::query(&upsert_sql(&self.table))
            .bind(&record.doc_id)
            .bind(&record.key)
            .bind(&record.e_tag)
            .bind(size)
            .bind(Json(&record.extra))
            .execute(&self.pool)
            .await?;

        debug!(size = record.size, e_tag = %record.e_tag, "Catalog record upserted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn scan(&self) -> Result<Vec<CatalogRecord>, StoreError> {
        let rows = sqlx::query_as::<_, CatalogRow>(&scan_sql(&self.table))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(CatalogRecord::try_from).collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            doc_id     TEXT PRIMARY KEY,
            key        TEXT NOT NULL,
            e_tag      TEXT NOT NULL,
            size       BIGINT NOT NULL CHECK (size >= 0),
            extra      JSONB NOT NULL DEFAULT '{{}}'::jsonb,
            indexed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
    )
}

fn upsert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {table} (doc_id, key, e_tag, size, extra, indexed_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (doc_id) DO UPDATE SET
            key = EXCLUDED.key,
            e_tag = EXCLUDED.e_tag,
            size = EXCLUDED.size,
            extra = EXCLUDED.extra,
            indexed_at = EXCLUDED.indexed_at
        "#
    )
}

fn scan_sql(table: &str) -> String {
    format!("SELECT doc_id, key, e_tag, size, extra FROM {table}")
}
