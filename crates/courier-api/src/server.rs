//! HTTP server assembly.
//!
//! Routes, middleware stack, and the serve loop. Health probes are public;
//! the `/api/v1` group sits behind the bearer-token middleware whenever a
//! token is configured. Requests flow through request-id injection, trace
//! logging, and a timeout layer before reaching handlers.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{handlers, middleware::auth::auth_middleware, AppState};

/// Request timeout applied to every route.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the router with all routes and middleware.
///
/// When `api_token` is `None` the administrative group is served without
/// authentication, mirroring deployments that sit behind their own gateway.
pub fn create_router(state: AppState, api_token: Option<String>) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        .with_state(state.clone());

    let mut api_routes = Router::new()
        .route("/api/v1/messages", post(handlers::create_message))
        .route("/api/v1/messages/sent", get(handlers::get_sent_messages))
        .route("/api/v1/messages/stats", get(handlers::get_stats))
        .route("/api/v1/messages/{id}", get(handlers::get_message))
        .route("/api/v1/scheduler/start", post(handlers::start_scheduler))
        .route("/api/v1/scheduler/stop", post(handlers::stop_scheduler))
        .route("/api/v1/scheduler/status", get(handlers::scheduler_status))
        .with_state(state);

    if let Some(token) = api_token {
        api_routes =
            api_routes.layer(middleware::from_fn_with_state(Arc::new(token), auth_middleware));
    }

    Router::new()
        .merge(health_routes)
        .merge(api_routes)
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
}

/// Injects an `X-Request-Id` header into every response.
async fn inject_request_id(req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let mut req = req;
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves the router until the shutdown token fires.
///
/// The caller owns shutdown ordering: the scheduler must be stopped before
/// this future is asked to resolve, or batch transactions could outlive the
/// process.
///
/// # Errors
///
/// Returns an IO error when the listener cannot bind or the server fails.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
