//! Scheduler lifecycle endpoints.
//!
//! Starting an already-running scheduler (or stopping a stopped one) from
//! the API is a client error; the scheduler object itself treats re-entrant
//! transitions as warn-and-succeed no-ops.

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;

use super::{ApiError, SchedulerStatusResponse, SuccessResponse};
use crate::AppState;

/// `POST /api/v1/scheduler/start`.
pub async fn start_scheduler(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<serde_json::Value>)> {
    if state.scheduler.is_running().await {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "scheduler is already running" })),
        ));
    }

    state
        .scheduler
        .start()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;

    Ok(Json(SuccessResponse { message: "scheduler started successfully" }))
}

/// `POST /api/v1/scheduler/stop`.
pub async fn stop_scheduler(
    State(state): State<AppState>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<serde_json::Value>)> {
    if !state.scheduler.is_running().await {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "scheduler is not running" })),
        ));
    }

    state
        .scheduler
        .stop()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": e.to_string() }))))?;

    Ok(Json(SuccessResponse { message: "scheduler stopped successfully" }))
}

/// `GET /api/v1/scheduler/status`.
pub async fn scheduler_status(
    State(state): State<AppState>,
) -> Result<Json<SchedulerStatusResponse>, ApiError> {
    let stats = state.scheduler.stats().await;

    Ok(Json(SchedulerStatusResponse {
        is_running: stats.is_running,
        last_run_at: stats.last_run_at,
        total_processed: stats.total_processed,
        total_successful: stats.total_successful,
        total_failed: stats.total_failed,
    }))
}
