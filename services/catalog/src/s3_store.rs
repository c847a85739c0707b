use crate::blob_store::{BlobError, BlobStore, SignedUrl};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// [`BlobStore`] backed by an S3-compatible bucket
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    expiry: Duration,
}

impl S3BlobStore {
    /// Create a new S3 blob store client
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            expiry_secs = config.presigned_url_expiry_secs,
            "S3 blob store initialized"
        );

        Self {
            client,
            bucket: config.bucket.clone(),
            expiry: config.presigned_url_expiry(),
        }
    }

    /// Check if an object exists in the bucket
    pub async fn object_exists(&self, key: &str) -> Result<bool, BlobError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(BlobError::Unavailable(DisplayErrorContext(&e).to_string()))
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    /// Signing a GET never fails for an absent key, so existence is checked
    /// with `HeadObject` first.
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn presign_get(&self, key: &str) -> Result<SignedUrl, BlobError> {
        if !self.object_exists(key).await? {
            return Err(BlobError::NotFound {
                key: key.to_string(),
            });
        }

        let presigning_config = PresigningConfig::expires_in(self.expiry)
            .map_err(|e| BlobError::Presign(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| BlobError::Presign(e.to_string()))?;

        let validity =
            chrono::Duration::from_std(self.expiry).map_err(|e| BlobError::Presign(e.to_string()))?;

        debug!(expiry_secs = self.expiry.as_secs(), "Presigned GET URL minted");

        Ok(SignedUrl {
            url: presigned.uri().to_string(),
            expires_at: Utc::now() + validity,
        })
    }
}
