use crate::blob_store::{BlobError, BlobStore};
use crate::catalog_store::{CatalogStore, StoreError};
use crate::config::ApiConfig;
use crate::record::CatalogEntry;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogStore>,
    pub blobs: Arc<dyn BlobStore>,
}

/// Outcome of resolving a document id
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieval {
    /// Redirect target for the document bytes
    Found { location: String },
    /// The blob store has no object under this id
    NotFound { doc_id: String },
}

/// Read path failures other than a missing document
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to read catalog: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to resolve document: {0}")]
    Blob(BlobError),
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Project every catalog record for listing. No pagination.
#[instrument(skip_all)]
pub async fn list_documents(catalog: &dyn CatalogStore) -> Result<Vec<CatalogEntry>, ApiError> {
    let records = catalog.scan().await?;
    Ok(records.into_iter().map(CatalogEntry::from).collect())
}

/// Resolve `doc_id` to a signed URL redirect.
///
/// The catalog is not consulted: the blob store decides whether the bytes
/// exist, so a record and its object can disagree until the next upload.
#[instrument(skip(blobs))]
pub async fn get_document(blobs: &dyn BlobStore, doc_id: &str) -> Result<Retrieval, ApiError> {
    match blobs.presign_get(doc_id).await {
        Ok(signed) => Ok(Retrieval::Found {
            location: signed.url,
        }),
        Err(e) if e.is_not_found() => Ok(Retrieval::NotFound {
            doc_id: doc_id.to_string(),
        }),
        Err(e) => Err(ApiError::Blob(e)),
    }
}

impl IntoResponse for Retrieval {
    fn into_response(self) -> Response {
        match self {
            Retrieval::Found { location } => {
                (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
            }
            Retrieval::NotFound { doc_id } => (
                StatusCode::NOT_FOUND,
                format!("Doc with {doc_id} not found."),
            )
                .into_response(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = match self {
            ApiError::Store(_) => "STORE_ERROR",
            ApiError::Blob(_) => "BLOB_ERROR",
        };

        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: self.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Create the document router
///
/// Every path other than `/` is a document id, slashes included. Probes are
/// served by [`create_probe_router`] on their own port.
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", get(list_handler))
        .route("/*doc_id", get(get_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Create the health and readiness router
pub fn create_probe_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "catalog-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalog.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "catalog": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "catalog": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

async fn list_handler(State(state): State<AppState>) -> Result<Json<Vec<CatalogEntry>>, ApiError> {
    let entries = list_documents(state.catalog.as_ref()).await.map_err(|e| {
        error!(error = %e, "Failed to list catalog");
        e
    })?;

    Ok(Json(entries))
}

async fn get_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Retrieval, ApiError> {
    let retrieval = get_document(state.blobs.as_ref(), &doc_id)
        .await
        .map_err(|e| {
            error!(error = %e, doc_id = %doc_id, "Failed to resolve document");
            e
        })?;

    match &retrieval {
        Retrieval::Found { .. } => metrics::counter!("catalog.api.redirects").increment(1),
        Retrieval::NotFound { doc_id } => {
            warn!(doc_id = %doc_id, "Document not found");
            metrics::counter!("catalog.api.not_found").increment(1);
        }
    }

    Ok(retrieval)
}

/// Start the catalog read API and serve until `shutdown` fires
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state.clone(), config);
    let probe_router = create_probe_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let probe_addr = format!("{}:{}", config.host, config.probe_port);

    info!(address = %addr, probe_address = %probe_addr, "Starting catalog API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    let probe_listener = tokio::net::TcpListener::bind(&probe_addr)
        .await
        .context("Failed to bind probe address")?;

    let api_shutdown = shutdown.clone();
    let api = async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await
            .context("API server error")
    };
    let probes = async move {
        axum::serve(probe_listener, probe_router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("Probe server error")
    };

    tokio::try_join!(api, probes)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::{MockBlobStore, SignedUrl};
    use crate::catalog_store::{InMemoryCatalogStore, MockCatalogStore};
    use crate::ingest::IngestionHandler;
    use crate::notification::ObjectCreatedNotification;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    const SIGNED_PREFIX: &str = "https://docs.s3.amazonaws.com/";

    fn signing_blob_store(known: &'static [&'static str]) -> MockBlobStore {
        let mut blobs = MockBlobStore::new();
        blobs.expect_presign_get().returning(move |key| {
            if known.contains(&key) {
                Ok(SignedUrl {
                    url: format!("{SIGNED_PREFIX}{key}?X-Amz-Expires=900&X-Amz-Signature=f00"),
                    expires_at: Utc::now(),
                })
            } else {
                Err(BlobError::NotFound {
                    key: key.to_string(),
                })
            }
        });
        blobs
    }

    fn router(catalog: Arc<dyn CatalogStore>, blobs: MockBlobStore) -> Router {
        let state = AppState {
            catalog,
            blobs: Arc::new(blobs),
        };
        create_router(state, &ApiConfig::default())
    }

    async fn send(router: Router, uri: &str) -> Response {
        router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_list_reflects_exactly_ingested_records() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let handler = IngestionHandler::new(store.clone(), 4);
        handler
            .process_batch(vec![
                ObjectCreatedNotification::new("a", 1, "ta"),
                ObjectCreatedNotification::new("b", 2, "tb"),
                ObjectCreatedNotification::new("c", 3, "tc"),
            ])
            .await
            .unwrap();

        let mut entries = list_documents(store.as_ref()).await.unwrap();
        entries.sort_by(|a, b| a.key.cmp(&b.key));

        assert_eq!(
            entries,
            vec![
                CatalogEntry { e_tag: "ta".to_string(), key: "a".to_string(), size: 1 },
                CatalogEntry { e_tag: "tb".to_string(), key: "b".to_string(), size: 2 },
                CatalogEntry { e_tag: "tc".to_string(), key: "c".to_string(), size: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn test_get_existing_key_redirects() {
        let blobs = signing_blob_store(&["doc1"]);
        let retrieval = get_document(&blobs, "doc1").await.unwrap();

        match retrieval {
            Retrieval::Found { location } => {
                assert!(location.starts_with(SIGNED_PREFIX));
                assert!(location.contains("X-Amz-Signature"));
            }
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let blobs = signing_blob_store(&["doc1"]);
        let retrieval = get_document(&blobs, "ghost").await.unwrap();
        assert_eq!(
            retrieval,
            Retrieval::NotFound {
                doc_id: "ghost".to_string()
            }
        );

        let response = send(router(Arc::new(InMemoryCatalogStore::new()), blobs), "/ghost").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Doc with ghost not found.");
    }

    #[tokio::test]
    async fn test_blob_failure_is_not_reported_as_not_found() {
        let mut blobs = MockBlobStore::new();
        blobs
            .expect_presign_get()
            .returning(|_| Err(BlobError::Unavailable("access denied".to_string())));

        let response = send(router(Arc::new(InMemoryCatalogStore::new()), blobs), "/doc1").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["code"], "BLOB_ERROR");
    }

    #[tokio::test]
    async fn test_list_store_failure_is_internal_error() {
        let mut catalog = MockCatalogStore::new();
        catalog
            .expect_scan()
            .returning(|| Err(StoreError::Unavailable("connection refused".to_string())));

        let response = send(router(Arc::new(catalog), MockBlobStore::new()), "/").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["code"], "STORE_ERROR");
    }

    #[tokio::test]
    async fn test_percent_encoded_key_is_decoded_once() {
        let blobs = signing_blob_store(&["reports/q1.pdf"]);
        let response = send(router(Arc::new(InMemoryCatalogStore::new()), blobs), "/reports%2Fq1.pdf").await;
        assert_eq!(response.status(), StatusCode::FOUND);
    }

    #[tokio::test]
    async fn test_nested_key_reaches_blob_store() {
        let blobs = signing_blob_store(&["reports/q1.pdf"]);
        let app = router(Arc::new(InMemoryCatalogStore::new()), blobs);

        let response = send(app.clone(), "/reports/q1.pdf").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert_eq!(
            location,
            format!("{SIGNED_PREFIX}reports/q1.pdf?X-Amz-Expires=900&X-Amz-Signature=f00")
        );

        let response = send(app, "/reports/q2.pdf").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "Doc with reports/q2.pdf not found.");
    }

    #[tokio::test]
    async fn test_probe_names_are_ordinary_documents() {
        let blobs = signing_blob_store(&["health", "ready"]);
        let app = router(Arc::new(InMemoryCatalogStore::new()), blobs);

        for uri in ["/health", "/ready"] {
            let response = send(app.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_end_to_end_report_pdf() {
        let store = Arc::new(InMemoryCatalogStore::new());
        let handler = IngestionHandler::new(store.clone(), 4);

        let report = handler
            .process_raw_batch(vec![serde_json::json!({
                "key": "report.pdf",
                "size": 4096,
                "eTag": "abc123"
            })])
            .await
            .unwrap();
        assert!(report.is_success());

        let record = store.get("report.pdf").unwrap();
        assert_eq!(record.doc_id, "report.pdf");
        assert_eq!(record.key, "report.pdf");
        assert_eq!(record.e_tag, "abc123");
        assert_eq!(record.size, 4096);

        let app = router(store.clone(), signing_blob_store(&["report.pdf"]));

        let response = send(app.clone(), "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(
            body,
            serde_json::json!([{"eTag": "abc123", "key": "report.pdf", "size": 4096}])
        );

        let response = send(app, "/report.pdf").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers().get(header::LOCATION).unwrap().to_str().unwrap();
        assert!(location.starts_with(SIGNED_PREFIX));
    }

    fn probe_router(catalog: Arc<dyn CatalogStore>) -> Router {
        create_probe_router(AppState {
            catalog,
            blobs: Arc::new(MockBlobStore::new()),
        })
    }

    #[tokio::test]
    async fn test_readiness_reports_store_outage() {
        let mut catalog = MockCatalogStore::new();
        catalog
            .expect_ping()
            .returning(|| Err(StoreError::Unavailable("pool timed out".to_string())));

        let response = send(probe_router(Arc::new(catalog)), "/ready").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = send(probe_router(Arc::new(InMemoryCatalogStore::new())), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(probe_router(Arc::new(InMemoryCatalogStore::new())), "/ready").await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
