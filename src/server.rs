//! HTTP API for reconciliation, quote matching, and worker callbacks.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (name, version, status) |
//! | `POST` | `/api/reconcile` | Reconcile an identifier/part/name/URL |
//! | `POST` | `/api/quotes/{id}/match` | Match a quote's line items |
//! | `GET`  | `/api/lookups/{task_id}` | Poll an external lookup |
//! | `POST` | `/api/requeue` | Re-dispatch unresolved links |
//! | `POST` | `/callbacks/affiliate/{task_id}` | Worker affiliate-link callback |
//! | `POST` | `/callbacks/search/{task_id}` | Worker product-search callback |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid callback body" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found`
//! (404), `internal` (500). An unknown poll id is not an error; the
//! poll body carries `"status": "not_found"`.
//!
//! # Callback authentication
//!
//! When `[worker].callback_secret` is set, callback requests must carry
//! an `X-Recon-Signature` header holding the hex HMAC-SHA256 digest of
//! the raw request body. Requests failing verification are rejected
//! with 401 before any state is touched.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tower_http::cors::{Any, CorsLayer};

use crate::cache::{LookupCache, SqliteCache};
use crate::config::Config;
use crate::db;
use crate::lookup::{LookupCoordinator, PollReply, UnknownTask};
use crate::migrate;
use crate::models::{QuoteMatchSummary, RankedResult, RequeueReport, WorkerCallback};
use crate::reconcile::{ReconcileRequest, Reconciler};
use crate::store::{CatalogStore, SqliteStore};
use crate::worker::{HttpWorkerClient, WorkerClient};

type HmacSha256 = Hmac<Sha256>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    store: Arc<dyn CatalogStore>,
    cache: Arc<dyn LookupCache>,
    worker: Arc<dyn WorkerClient>,
}

impl AppState {
    fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.store.clone(),
            self.cache.clone(),
            self.worker.clone(),
            (*self.config).clone(),
        )
    }

    fn coordinator(&self) -> LookupCoordinator<'_> {
        LookupCoordinator::new(
            self.store.as_ref(),
            self.cache.as_ref(),
            self.worker.as_ref(),
            &self.config.lookup,
        )
    }
}

/// Run the HTTP API on `[server].bind` until the process terminates.
/// The schema is migrated first so a fresh database works out of the
/// box.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    migrate::run_migrations(config).await?;

    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let worker = HttpWorkerClient::new(&config.worker, &config.server)?;
    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::new(SqliteStore::new(pool.clone())),
        cache: Arc::new(SqliteCache::new(pool)),
        worker: Arc::new(worker),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/reconcile", post(handle_reconcile))
        .route("/api/quotes/{id}/match", post(handle_match_quote))
        .route("/api/lookups/{task_id}", get(handle_poll))
        .route("/api/requeue", post(handle_requeue))
        .route("/callbacks/affiliate/{task_id}", post(handle_affiliate_callback))
        .route("/callbacks/search/{task_id}", post(handle_search_callback))
        .layer(cors)
        .with_state(state);

    println!("reconciliation API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn internal_from(err: anyhow::Error) -> AppError {
    internal(err.to_string())
}

/// Callback processing failures: an unknown correlation id is the
/// caller's mistake, everything else is ours.
fn callback_error(err: anyhow::Error) -> AppError {
    if err.is::<UnknownTask>() {
        not_found(err.to_string())
    } else {
        internal(err.to_string())
    }
}

// ============ Signature verification ============

/// Check the `X-Recon-Signature` HMAC of the raw callback body. A
/// missing configured secret disables verification entirely.
fn verify_signature(
    secret: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), AppError> {
    let Some(secret) = secret else {
        return Ok(());
    };

    let provided = headers
        .get("x-recon-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| unauthorized("missing X-Recon-Signature header"))?;
    let digest = hex::decode(provided).map_err(|_| unauthorized("malformed signature"))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| internal("callback secret is not usable as an HMAC key"))?;
    mac.update(body);
    mac.verify_slice(&digest)
        .map_err(|_| unauthorized("signature mismatch"))?;
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    name: String,
    version: String,
    status: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "ok".to_string(),
    })
}

// ============ POST /api/reconcile ============

#[derive(Serialize)]
struct ReconcileResponse {
    results: Vec<RankedResult>,
}

async fn handle_reconcile(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let results = state
        .reconciler()
        .reconcile(&request)
        .await
        .map_err(internal_from)?;
    Ok(Json(ReconcileResponse { results }))
}

// ============ POST /api/quotes/{id}/match ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct MatchQuoteRequest {
    demo_mode: bool,
}

async fn handle_match_quote(
    State(state): State<AppState>,
    Path(quote_id): Path<String>,
    Json(request): Json<MatchQuoteRequest>,
) -> Result<Json<QuoteMatchSummary>, AppError> {
    let summary = state
        .reconciler()
        .match_quote(&quote_id, request.demo_mode)
        .await
        .map_err(internal_from)?;
    summary
        .map(Json)
        .ok_or_else(|| not_found(format!("Quote not found: {quote_id}")))
}

// ============ GET /api/lookups/{task_id} ============

async fn handle_poll(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reply = state
        .coordinator()
        .poll(&task_id)
        .await
        .map_err(internal_from)?;
    let body = match reply {
        PollReply::Completed(outcome) => json!({ "status": "completed", "result": outcome }),
        PollReply::Processing => json!({ "status": "processing" }),
        PollReply::Unknown => json!({ "status": "not_found" }),
    };
    Ok(Json(body))
}

// ============ POST /api/requeue ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct RequeueRequest {
    platform: Option<String>,
    limit: Option<i64>,
    dry_run: bool,
}

async fn handle_requeue(
    State(state): State<AppState>,
    Json(request): Json<RequeueRequest>,
) -> Result<Json<RequeueReport>, AppError> {
    let report = state
        .coordinator()
        .requeue(request.platform.as_deref(), request.limit, request.dry_run)
        .await
        .map_err(internal_from)?;
    Ok(Json(report))
}

// ============ POST /callbacks/{kind}/{task_id} ============

async fn handle_affiliate_callback(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    verify_signature(state.config.worker.callback_secret.as_deref(), &headers, &body)?;
    let callback: WorkerCallback = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid callback body: {e}")))?;
    let outcome = state
        .coordinator()
        .resolve_affiliate_callback(&task_id, &callback)
        .await
        .map_err(callback_error)?;
    Ok(Json(json!({ "status": "ok", "result": outcome })))
}

async fn handle_search_callback(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    verify_signature(state.config.worker.callback_secret.as_deref(), &headers, &body)?;
    let callback: WorkerCallback = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("invalid callback body: {e}")))?;
    let outcome = state
        .coordinator()
        .resolve_search_callback(&task_id, &callback)
        .await
        .map_err(callback_error)?;
    Ok(Json(json!({ "status": "ok", "result": outcome })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_headers(signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-recon-signature", signature.parse().unwrap());
        headers
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_no_secret_disables_verification() {
        let headers = HeaderMap::new();
        assert!(verify_signature(None, &headers, b"{}").is_ok());
    }

    #[test]
    fn test_valid_signature_passes() {
        let body = br#"{"affiliateUrl":"https://amzn.to/x"}"#;
        let headers = signed_headers(&sign("s3cret", body));
        assert!(verify_signature(Some("s3cret"), &headers, body).is_ok());
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        let err = verify_signature(Some("s3cret"), &HeaderMap::new(), b"{}").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_tampered_body_is_unauthorized() {
        let headers = signed_headers(&sign("s3cret", b"{\"price\":34.99}"));
        let err = verify_signature(Some("s3cret"), &headers, b"{\"price\":1.00}").unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.code, "unauthorized");
    }
}
