//! Blob store contract used by the read path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Time-limited capability URL for direct object retrieval
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUrl {
    pub url: String,
    /// End of the validity window set by the blob store's policy
    pub expires_at: DateTime<Utc>,
}

/// Blob store failures
#[derive(Debug, Error)]
pub enum BlobError {
    /// The object does not exist. Not a system fault.
    #[error("No such object: {key}")]
    NotFound { key: String },

    #[error("Blob store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to presign request: {0}")]
    Presign(String),
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

/// Object store able to mint signed retrieval URLs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Mint a signed GET URL for `key`.
    ///
    /// Returns [`BlobError::NotFound`] when the object is absent.
    async fn presign_get(&self, key: &str) -> Result<SignedUrl, BlobError>;
}
