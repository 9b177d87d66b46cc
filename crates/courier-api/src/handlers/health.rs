//! Health, readiness, and liveness probes.
//!
//! `/health` reports per-component status for operators; `/ready` gates
//! traffic until both backends answer; `/live` only proves the process is
//! responsive.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::AppState;

/// Overall health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Aggregate status.
    pub status: HealthStatus,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
    /// Per-component results.
    pub checks: HealthChecks,
}

/// Aggregate service health.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All components answered.
    Healthy,
    /// At least one component is down.
    Unhealthy,
}

/// Per-component health results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// PostgreSQL connectivity.
    pub database: ComponentHealth,
    /// Redis connectivity.
    pub cache: ComponentHealth,
}

/// Health of one component.
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    /// Up or down.
    pub status: ComponentStatus,
    /// Error detail when down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Component status tag.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component answered.
    Up,
    /// Component failed the check.
    Down,
}

async fn check_components(state: &AppState) -> HealthChecks {
    let database = match state.store.health_check().await {
        Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None },
        Err(e) => {
            error!(error = %e, "database health check failed");
            ComponentHealth { status: ComponentStatus::Down, message: Some(e.to_string()) }
        },
    };

    let cache = match state.cache.health_check().await {
        Ok(()) => ComponentHealth { status: ComponentStatus::Up, message: None },
        Err(e) => {
            error!(error = %e, "cache health check failed");
            ComponentHealth { status: ComponentStatus::Down, message: Some(e.to_string()) }
        },
    };

    HealthChecks { database, cache }
}

/// `GET /health` - component-level health report.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let checks = check_components(&state).await;

    let healthy = checks.database.status == ComponentStatus::Up
        && checks.cache.status == ComponentStatus::Up;
    let (status, code) = if healthy {
        (HealthStatus::Healthy, StatusCode::OK)
    } else {
        (HealthStatus::Unhealthy, StatusCode::SERVICE_UNAVAILABLE)
    };

    (code, Json(HealthResponse { status, timestamp: Utc::now(), checks }))
}

/// `GET /ready` - readiness gate for orchestrators.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let checks = check_components(&state).await;

    if checks.database.status == ComponentStatus::Up && checks.cache.status == ComponentStatus::Up
    {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// `GET /live` - process liveness.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}
