//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

/// Live while the poll loop keeps completing cycles or a job is running.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let live = state.worker.is_live(state.staleness);
    let body = json!({
        "status": if live { "ok" } else { "stale" },
        "current_job": state.worker.current_job().map(|id| id.to_string()),
        "since_last_poll_ms": state.worker.since_last_poll().as_millis() as u64,
    });
    let status = if live {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

/// Ready when the job store answers.
async fn ready(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if !state.worker.is_ready() {
        return Err(ApiError::Unavailable("job store not reachable".into()));
    }
    state.queue.ping().await?;

    let jobs: Map<String, Value> = state
        .queue
        .count_by_status()
        .await?
        .into_iter()
        .map(|(status, count)| (status.to_string(), json!(count)))
        .collect();
    Ok(Json(json!({ "status": "ready", "jobs": jobs })))
}
