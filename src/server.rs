//! HTTP server of record.
//!
//! Owns the remote store and exposes it as a JSON HTTP API. Clients push
//! their local records through `POST /api/ebooks/sync`; documents uploaded
//! through `POST /api/pdf/upload` are extracted server-side and inserted
//! directly.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/api/pdf/upload` | Extract metadata from a base64 PDF and store it |
//! | `GET`    | `/api/pdf/list` | Every record, most recent upload first |
//! | `POST`   | `/api/ebooks/sync` | Upsert one record (two-tier identity resolution) |
//! | `GET`    | `/api/ebooks/{id}` | Record by external id |
//! | `DELETE` | `/api/ebooks/{internal_id}` | Remove a row by internal id |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "ebook not found: internal id 9" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `payload_too_large` (413), `internal` (500). Bodies that fail to decode
//! or exceed the body limit get the same shape.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients on
//! another origin can sync.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use baobab_core::extract::{ExtractError, MetadataExtractor};
use baobab_core::models::Ebook;
use baobab_core::store::{ServerStore, StoreError};

use crate::config::Config;
use crate::extract::PdfMetadataExtractor;
use crate::remote_store::SqliteRemoteStore;
use crate::{db, migrate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn ServerStore>,
    extractor: Arc<dyn MetadataExtractor>,
    /// Decoded document size limit for uploads.
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ServerStore>,
        extractor: Arc<dyn MetadataExtractor>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            store,
            extractor,
            max_upload_bytes,
        }
    }
}

/// Builds the router with all endpoints, CORS, and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Base64 inflates the payload by 4/3, plus room for the JSON envelope.
    let body_limit = state
        .max_upload_bytes
        .saturating_div(3)
        .saturating_mul(4)
        .saturating_add(64 * 1024);

    Router::new()
        .route("/api/pdf/upload", post(handle_upload))
        .route("/api/pdf/list", get(handle_list))
        .route("/api/ebooks/sync", post(handle_sync))
        .route("/api/ebooks/{id}", get(handle_get).delete(handle_delete))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serves the API on an already-bound listener until the process ends.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Starts the server of record.
///
/// Opens (and migrates) the remote database at `[remote].path`, then binds
/// to `[server].bind`. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect_remote(config).await?;
    migrate::migrate_remote(&pool).await?;

    let state = AppState::new(
        Arc::new(SqliteRemoteStore::new(pool)),
        Arc::new(PdfMetadataExtractor::new(config.upload.max_bytes)),
        config.upload.max_bytes,
    );

    let listener = TcpListener::bind(&config.server.bind).await?;
    println!("Baobab server listening on http://{}", listener.local_addr()?);
    info!(bind = %config.server.bind, db = %config.remote.path.display(), "server started");

    serve(listener, state).await
}

// ============ Error response ============

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Machine-readable code plus human-readable message.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn payload_too_large(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::PAYLOAD_TOO_LARGE,
        code: "payload_too_large",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => not_found(err.to_string()),
            StoreError::Invalid(_) => bad_request(err.to_string()),
            other => {
                warn!(error = %other, "store failure");
                internal(other.to_string())
            }
        }
    }
}

/// Body that failed to buffer or decode. Oversized bodies keep their 413.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            payload_too_large(message)
        } else {
            bad_request(message)
        }
    }
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Open { .. } => bad_request(err.to_string()),
            ExtractError::TooLarge { .. } => payload_too_large(err.to_string()),
        }
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// The crate version from `Cargo.toml`.
    pub version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/pdf/upload ============

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadRequest {
    pub filename: String,
    /// Base64 document bytes, optionally as a `data:` URL.
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    /// Internal id of the new row.
    pub id: i64,
    pub external_id: String,
    pub filename: String,
}

/// Strips a `data:<mime>;base64,` prefix when present.
fn base64_payload(data: &str) -> &str {
    if data.starts_with("data:") {
        if let Some((_, payload)) = data.split_once(',') {
            return payload;
        }
    }
    data
}

async fn handle_upload(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let Json(req) = payload?;
    let filename = req.filename.trim().to_string();
    if filename.is_empty() {
        return Err(bad_request("filename must not be empty"));
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(base64_payload(req.data.trim()))
        .map_err(|e| bad_request(format!("data is not valid base64: {}", e)))?;
    if bytes.len() > state.max_upload_bytes {
        return Err(payload_too_large(format!(
            "document is {} bytes, limit is {}",
            bytes.len(),
            state.max_upload_bytes
        )));
    }

    let extractor = state.extractor.clone();
    let label = filename.clone();
    let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes, &label))
        .await
        .map_err(|e| internal(format!("extraction task failed: {}", e)))??;

    let persisted = state.store.insert(&extracted.into_ebook(&filename)).await?;
    let internal_id = persisted
        .internal_id
        .ok_or_else(|| internal("stored row has no internal id"))?;
    info!(internal_id, id = %persisted.id, filename = %filename, "document uploaded");

    Ok(Json(UploadResponse {
        success: true,
        id: internal_id,
        external_id: persisted.id,
        filename,
    }))
}

// ============ GET /api/pdf/list ============

async fn handle_list(State(state): State<AppState>) -> Result<Json<Vec<Ebook>>, AppError> {
    Ok(Json(state.store.list().await?))
}

// ============ POST /api/ebooks/sync ============

async fn handle_sync(
    State(state): State<AppState>,
    payload: Result<Json<Ebook>, JsonRejection>,
) -> Result<Json<Ebook>, AppError> {
    let Json(ebook) = payload?;
    let persisted = state.store.upsert(&ebook).await?;
    info!(id = %persisted.id, internal_id = ?persisted.internal_id, "ebook upserted");
    Ok(Json(persisted))
}

// ============ GET /api/ebooks/{id} ============

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Ebook>, AppError> {
    state
        .store
        .get_by_external_id(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(format!("no ebook with id: {}", id)))
}

// ============ DELETE /api/ebooks/{internal_id} ============

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let internal_id: i64 = id
        .parse()
        .map_err(|_| bad_request(format!("internal id must be an integer, got '{}'", id)))?;
    state.store.delete(internal_id).await?;
    info!(internal_id, "remote row deleted");
    Ok(StatusCode::NO_CONTENT)
}
