use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Catalog store configuration
    pub catalog: CatalogConfig,
    /// Blob store configuration
    pub s3: S3Config,
    /// Notification consumer configuration
    pub kafka: KafkaConfig,
    /// Ingestion handler configuration
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Read API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Catalog store (PostgreSQL) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// Table holding catalog records. Required, no default.
    pub table: String,
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Create the catalog table on startup if it is missing
    #[serde(default = "default_true")]
    pub ensure_schema: bool,
}

/// Blob store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the documents. Required, no default.
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Signed URL validity window in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
}

/// Kafka consumer configuration for bucket notifications
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic the blob store publishes bucket notifications to
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,
    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,
    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,
    /// First delay before retrying failed upserts
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound for the retry delay
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

/// Ingestion handler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Upserts in flight per batch
    #[serde(default = "default_ingest_concurrency")]
    pub concurrency: usize,
}

/// Read API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Port for the health and readiness probes, kept off the document path space
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "catalog-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    900 // 15 minutes, matches the SDK signer default
}

fn default_consumer_group() -> String {
    "catalog-service".to_string()
}

fn default_notifications_topic() -> String {
    "nier.documents.notifications".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    30000
}

fn default_ingest_concurrency() -> usize {
    16
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_probe_port() -> u16 {
    8081
}

/// Longest validity window S3 accepts for a SigV4 presigned URL
const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "catalog-service")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/catalog").required(false))
            .add_source(config::File::with_name("/etc/nier/catalog").required(false))
            // CATALOG__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("CATALOG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration.
    ///
    /// The store table and the bucket are the two identifiers the service
    /// cannot run without; both are checked before anything is started.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.catalog.table.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("catalog.table".to_string()));
        }
        if !is_table_identifier(&self.catalog.table) {
            return Err(ConfigValidationError::InvalidValue {
                field: "catalog.table".to_string(),
                message: "must be [schema.]table using letters, digits and underscores".to_string(),
            });
        }

        if self.catalog.database_url.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "catalog.database_url".to_string(),
            ));
        }

        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        if self.s3.presigned_url_expiry_secs == 0
            || self.s3.presigned_url_expiry_secs > MAX_PRESIGN_EXPIRY_SECS
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "s3.presigned_url_expiry_secs".to_string(),
                message: format!("must be between 1 and {MAX_PRESIGN_EXPIRY_SECS}"),
            });
        }

        if self.kafka.bootstrap_servers.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "kafka.bootstrap_servers".to_string(),
            ));
        }

        if self.api.probe_port == self.api.port {
            return Err(ConfigValidationError::InvalidValue {
                field: "api.probe_port".to_string(),
                message: "must differ from api.port".to_string(),
            });
        }

        if self.ingest.concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "ingest.concurrency".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

}

impl CatalogConfig {
    /// Get database connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl S3Config {
    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.presigned_url_expiry_secs)
    }
}

impl KafkaConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn is_table_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && part.len() <= 63
        })
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: default_ingest_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            probe_port: default_probe_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
