//! HTTP API.
//!
//! Serves search, README drafting, bundle download and cache management
//! over JSON, backed by one shared [`App`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (version, provider, index and cache state) |
//! | `GET`    | `/search?q=&size=` | Resolve a query; blank `q` lists cached results |
//! | `GET`    | `/search/history` | Prior searches, newest first |
//! | `POST`   | `/readme` | Draft a README for a [`ReadmeRequest`] (`text/markdown`) |
//! | `GET`    | `/readme/by-name/{name}` | Latest cached README for a name |
//! | `POST`   | `/generate_package` | Zip bundle for README + metadata |
//! | `GET`    | `/availability?name=` | README / bundle cache flags for one name |
//! | `POST`   | `/availability/batch` | Same, for `{ "names": [...] }` |
//! | `GET`    | `/cache/stats` | Row counts per tier |
//! | `DELETE` | `/cache/clear?cache_type=` | Clear `search`, `readme`, `package`, or all |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "size must be between 1 and 100" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `llm_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use pkgmirage_core::error::MirageError;
use pkgmirage_core::models::{Availability, HistoryEntry, ReadmeRequest, SearchResponse};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::app::{App, GeneratePackageRequest, IndexMode};
use crate::cache::{CacheKind, CacheStats};
use crate::config::Config;

/// How often the server re-checks snapshot freshness.
const INDEX_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Starts the HTTP server.
///
/// Opens the [`App`] with the startup policy, schedules the periodic
/// existence check, and serves on `[server].bind` until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = Arc::new(App::open(config.clone(), IndexMode::Revalidate).await?);
    app.track(app.index.spawn_periodic_check(INDEX_CHECK_INTERVAL));

    tracing::info!(
        model = app.completer.model_name(),
        index = app.startup_status().label(),
        "starting server"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("pkgmirage listening on http://{}", bind_addr);

    axum::serve(listener, router(app.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    app.close().await;
    Ok(())
}

pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", get(handle_search))
        .route("/search/history", get(handle_history))
        .route("/readme", post(handle_readme))
        .route("/readme/by-name/{name}", get(handle_readme_by_name))
        .route("/generate_package", post(handle_generate_package))
        .route("/availability", get(handle_availability))
        .route("/availability/batch", post(handle_availability_batch))
        .route("/cache/stats", get(handle_cache_stats))
        .route("/cache/clear", delete(handle_cache_clear))
        .layer(cors)
        .with_state(app)
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<MirageError> for AppError {
    fn from(err: MirageError) -> Self {
        if let MirageError::InvalidName(_) = err {
            return bad_request(err.to_string());
        }
        if err.is_fatal() {
            AppError {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "llm_unavailable",
                message: err.to_string(),
            }
        } else {
            internal(err.to_string())
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    llm_enabled: bool,
    index_names: usize,
    cache_stats: Option<CacheStats>,
}

async fn handle_health(State(app): State<Arc<App>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "pkgmirage",
        version: env!("CARGO_PKG_VERSION"),
        llm_enabled: app.completer.is_enabled(),
        index_names: app.index.len(),
        cache_stats: app.caches.stats().await.ok(),
    })
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchParams {
    #[serde(default)]
    q: String,
    size: Option<usize>,
}

async fn handle_search(
    State(app): State<Arc<App>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError> {
    let max = app.config.search.max_limit;
    if let Some(size) = params.size {
        if size == 0 || size > max {
            return Err(bad_request(format!("size must be between 1 and {}", max)));
        }
    }
    let response = app.search(&params.q, params.size, true).await?;
    Ok(Json(response))
}

// ============ GET /search/history ============

#[derive(Serialize)]
struct HistoryResponse {
    history: Vec<HistoryEntry>,
}

async fn handle_history(State(app): State<Arc<App>>) -> Result<Json<HistoryResponse>, AppError> {
    let history = app.caches.queries.history().await?;
    Ok(Json(HistoryResponse { history }))
}

// ============ README ============

fn markdown(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/markdown; charset=utf-8")],
        body,
    )
        .into_response()
}

async fn handle_readme(
    State(app): State<Arc<App>>,
    Json(request): Json<ReadmeRequest>,
) -> Result<Response, AppError> {
    if request.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    let readme = app.readme(&request).await?;
    Ok(markdown(readme.markdown))
}

async fn handle_readme_by_name(
    State(app): State<Arc<App>>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    match app.caches.documents.latest_by_name(&name).await? {
        Some(body) => Ok(markdown(body)),
        None => Err(not_found(format!("no cached README for {}", name))),
    }
}

// ============ POST /generate_package ============

async fn handle_generate_package(
    State(app): State<Arc<App>>,
    Json(request): Json<GeneratePackageRequest>,
) -> Result<Response, AppError> {
    if request.readme_markdown.trim().is_empty() {
        return Err(bad_request("readme_markdown is required"));
    }
    let name = request.metadata.package_name().to_string();
    let bytes = app
        .generate_package(request)
        .await
        .map_err(|e| match e.downcast::<MirageError>() {
            Ok(err) => AppError::from(err),
            Err(e) => internal(format!("{:#}", e)),
        })?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.zip\"", name),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ============ Availability ============

#[derive(Deserialize)]
struct AvailabilityParams {
    #[serde(default)]
    name: String,
}

async fn handle_availability(
    State(app): State<Arc<App>>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<Availability>, AppError> {
    if params.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }
    Ok(Json(app.caches.availability(&params.name).await))
}

#[derive(Deserialize)]
struct BatchRequest {
    names: Vec<String>,
}

#[derive(Serialize)]
struct BatchResponse {
    items: Vec<Availability>,
}

async fn handle_availability_batch(
    State(app): State<Arc<App>>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResponse> {
    let mut items = Vec::with_capacity(request.names.len());
    for name in &request.names {
        items.push(app.caches.availability(name).await);
    }
    Json(BatchResponse { items })
}

// ============ Cache management ============

async fn handle_cache_stats(State(app): State<Arc<App>>) -> Result<Json<CacheStats>, AppError> {
    Ok(Json(app.caches.stats().await?))
}

#[derive(Deserialize)]
struct ClearParams {
    cache_type: Option<String>,
}

#[derive(Serialize)]
struct ClearResponse {
    message: String,
    removed: u64,
}

async fn handle_cache_clear(
    State(app): State<Arc<App>>,
    Query(params): Query<ClearParams>,
) -> Result<Json<ClearResponse>, AppError> {
    let kind = match params.cache_type.as_deref() {
        None | Some("") | Some("all") => None,
        Some(other) => Some(
            other
                .parse::<CacheKind>()
                .map_err(|e| bad_request(e.to_string()))?,
        ),
    };
    let removed = app.caches.clear(kind).await?;
    let message = match kind {
        Some(k) => format!("{} cache cleared", k.as_str()),
        None => "all caches cleared".to_string(),
    };
    Ok(Json(ClearResponse { message, removed }))
}
