//! Operations API for the offline queue.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use pc_common::{QueueFilter, QueueStatus};
use pc_outbox::{EnqueueOptions, OfflineQueue, QueueError, SyncOptions};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<OfflineQueue>,
    pub max_concurrent: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/queue/stats", get(stats_handler))
        .route("/queue/items", get(list_handler).delete(clear_handler))
        .route("/queue/items/:id", get(item_handler))
        .route("/queue/items/:id/requeue", post(requeue_handler))
        .route("/queue/sync", post(sync_handler))
        .route("/queue/autos/:endpoint", post(enqueue_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}

impl ApiError {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
        }
    }
}

/// Maps queue errors onto HTTP responses.
pub struct ApiFailure(StatusCode, ApiError);

impl From<QueueError> for ApiFailure {
    fn from(e: QueueError) -> Self {
        let (status, code) = match &e {
            QueueError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            QueueError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            QueueError::StorageQuota { .. } => (StatusCode::INSUFFICIENT_STORAGE, "STORAGE_QUOTA_EXCEEDED"),
            QueueError::Persistence { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR"),
        };
        if status.is_server_error() {
            warn!("Queue request failed: {}", e);
        }
        ApiFailure(status, ApiError::new(code, e.to_string()))
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(self.1)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFailure>;

#[derive(Debug, Default, Deserialize)]
pub struct ItemsQuery {
    pub status: Option<String>,
    pub endpoint: Option<String>,
}

fn parse_status(status: Option<&str>) -> ApiResult<Option<QueueStatus>> {
    status
        .map(|s| s.parse::<QueueStatus>())
        .transpose()
        .map_err(|e| ApiFailure(StatusCode::BAD_REQUEST, ApiError::new("VALIDATION_ERROR", e.to_string())))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.queue.scheduler();
    Json(json!({
        "status": "READY",
        "online": state.queue.connectivity().is_online(),
        "sync": {
            "running": scheduler.is_running(),
            "requests": scheduler.requests(),
            "runs": scheduler.runs(),
            "lastResult": scheduler.last_result()
        }
    }))
}

async fn stats_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.queue.get_queue_stats().await?))
}

async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = QueueFilter {
        status: parse_status(query.status.as_deref())?,
        endpoint: query.endpoint.filter(|e| !e.is_empty()),
    };
    Ok(Json(state.queue.get_queue_items(&filter).await?))
}

async fn item_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.queue.get_queue_item(id).await?))
}

async fn clear_handler(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = parse_status(query.status.as_deref())?;
    let deleted = state.queue.clear_queue(status).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

async fn requeue_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let new_id = state.queue.requeue_failed_item(id).await?;
    Ok(Json(json!({ "id": new_id })))
}

async fn sync_handler(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let options = SyncOptions::default().with_max_concurrent(state.max_concurrent);
    Ok(Json(state.queue.sync_offline_queue(options).await?))
}

async fn enqueue_handler(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<impl IntoResponse> {
    let id = state
        .queue
        .add_to_offline_queue(&endpoint, &payload, EnqueueOptions::default())
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}
