mod catalog;
mod config_store;
mod feed;
mod http;
mod jobs;
mod metrics;
mod models;
mod settings;
mod supabase;
mod sync;
#[cfg(test)]
mod testing;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use catalog::FieldMapping;
use config_store::SyncConfig;
use eyre::eyre;
use feed::{FeedRequestConfig, HttpFeedConnector};
use jobs::{JobInfo, JobKind, JobQueue};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, CursorBody, EnqueueResponse, MappingUpdate, PhotoSyncRequest, ScanReport, ScanRequest};
use serde_json::json;
use settings::SyncSettings;
use std::{net::SocketAddr, sync::Arc};
use supabase::SupabaseClient;
use sync::{
    SyncService,
    error::{SyncError, SyncErrorKind},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "supplier_sync.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let settings = SyncSettings::load()?;
    let http = http::build_client();
    let supabase = Arc::new(SupabaseClient::from_env(http.clone()).ok_or_else(|| {
        eyre!("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set")
    })?);
    let service = SyncService::new(
        supabase.clone(),
        supabase,
        Arc::new(HttpFeedConnector::new(http)),
        SyncConfig::from_env(),
        settings,
    );
    let (queue, _worker) = JobQueue::spawn(service.clone());
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;

    let app = build_app(AppState {
        service,
        queue,
        prometheus_handle,
    });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "supplier_sync.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    service: SyncService,
    queue: JobQueue,
    prometheus_handle: PrometheusHandle,
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/feed/scan", post(scan_feed))
        .nest(
            "/config",
            Router::new()
                .route(
                    "/mapping",
                    get(get_mapping).put(update_mapping).delete(reset_mapping),
                )
                .route("/feed", get(get_feed).put(put_feed))
                .route(
                    "/cursor",
                    get(get_cursor).put(put_cursor).delete(reset_cursor),
                ),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/catalog-sync", post(enqueue_catalog_job))
                .route("/photo-sync", post(enqueue_photo_job))
                .route("/{id}", get(get_job_status))
                .route("/{id}/stop", post(stop_job)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "supplier-sync",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(8 * 1024 * 1024)
}

async fn metrics_endpoint(State(state): State<AppState>, headers: axum::http::HeaderMap) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Locate the record list in a feed page and propose a field mapping.
///
/// - Method: `POST`
/// - Path: `/feed/scan`
/// - Body: `ScanRequest` (inline `document`, or a `feed` config to fetch with)
/// - Response: `ScanReport`
async fn scan_feed(
    State(state): State<AppState>,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<ScanReport>, AppError> {
    crate::metrics::inc_requests("/feed/scan");
    let report = state.service.scan(payload).await?;
    Ok(Json(report))
}

async fn get_mapping(State(state): State<AppState>) -> Result<Json<FieldMapping>, AppError> {
    let mapping = state
        .service
        .config()
        .load_mapping()
        .await
        .map_err(|err| SyncError::config("mapping", err))?;
    Ok(Json(mapping))
}

/// Manual overrides, merged field by field into the saved mapping.
async fn update_mapping(
    State(state): State<AppState>,
    Json(edits): Json<MappingUpdate>,
) -> Result<Json<FieldMapping>, AppError> {
    crate::metrics::inc_requests("/config/mapping");
    let config = state.service.config();
    let mut mapping = config
        .load_mapping()
        .await
        .map_err(|err| SyncError::config("mapping", err))?;
    mapping.merge_manual(&edits);
    config
        .save_mapping(&mapping)
        .await
        .map_err(|err| SyncError::config("mapping", err))?;
    Ok(Json(mapping))
}

async fn reset_mapping(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state
        .service
        .config()
        .reset_mapping()
        .await
        .map_err(|err| SyncError::config("mapping", err))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_feed(State(state): State<AppState>) -> Result<Json<FeedRequestConfig>, AppError> {
    state
        .service
        .config()
        .load_feed()
        .await
        .map_err(|err| SyncError::config("feed", err))?
        .map(Json)
        .ok_or(AppError::NotFound("feed_not_configured"))
}

async fn put_feed(
    State(state): State<AppState>,
    Json(feed): Json<FeedRequestConfig>,
) -> Result<Json<FeedRequestConfig>, AppError> {
    crate::metrics::inc_requests("/config/feed");
    feed.validate()
        .map_err(|message| SyncError::invalid_input("feed", message))?;
    state
        .service
        .config()
        .save_feed(&feed)
        .await
        .map_err(|err| SyncError::config("feed", err))?;
    Ok(Json(feed))
}

async fn get_cursor(State(state): State<AppState>) -> Result<Json<CursorBody>, AppError> {
    let cursor = state
        .service
        .config()
        .load_cursor()
        .await
        .map_err(|err| SyncError::config("cursor", err))?;
    Ok(Json(CursorBody { cursor }))
}

async fn put_cursor(
    State(state): State<AppState>,
    Json(body): Json<CursorBody>,
) -> Result<Json<CursorBody>, AppError> {
    if body.cursor < 0 {
        return Err(SyncError::invalid_input("cursor", "cursor must not be negative").into());
    }
    state
        .service
        .config()
        .set_cursor(body.cursor)
        .await
        .map_err(|err| SyncError::config("cursor", err))?;
    Ok(Json(body))
}

async fn reset_cursor(State(state): State<AppState>) -> Result<Json<CursorBody>, AppError> {
    state
        .service
        .config()
        .reset_cursor()
        .await
        .map_err(|err| SyncError::config("cursor", err))?;
    Ok(Json(CursorBody { cursor: 0 }))
}

async fn enqueue_catalog_job(State(state): State<AppState>) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/catalog-sync");
    enqueue(&state, JobKind::CatalogSync).await
}

async fn enqueue_photo_job(
    State(state): State<AppState>,
    Json(payload): Json<PhotoSyncRequest>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/photo-sync");
    enqueue(&state, JobKind::PhotoSync(payload)).await
}

async fn enqueue(state: &AppState, kind: JobKind) -> Result<Json<EnqueueResponse>, AppError> {
    let id = state
        .queue
        .enqueue(kind)
        .await
        .map_err(|err| SyncError::internal("enqueue", err.error))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

fn parse_job_id(raw: &str) -> Result<uuid::Uuid, AppError> {
    uuid::Uuid::parse_str(raw).map_err(|_| SyncError::invalid_input("jobs", "invalid_job_id").into())
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    let id = parse_job_id(&id)?;
    state
        .queue
        .get(id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found"))
}

async fn stop_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, AppError> {
    crate::metrics::inc_requests("/jobs/stop");
    let id = parse_job_id(&id)?;
    state
        .queue
        .stop(id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found"))
}

#[derive(Debug)]
enum AppError {
    Sync(SyncError),
    NotFound(&'static str),
}

impl From<SyncError> for AppError {
    fn from(value: SyncError) -> Self {
        Self::Sync(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Sync(err) => {
                let status = match err.kind() {
                    SyncErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    SyncErrorKind::Upstream => StatusCode::BAD_GATEWAY,
                    SyncErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::NotFound(code) => {
                let payload = ApiError {
                    error: code.to_string(),
                    detail: None,
                };
                (StatusCode::NOT_FOUND, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
