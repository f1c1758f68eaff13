//! HTTP API route definitions
//!
//! Every `/scrq/*` route passes through the security-headers and request
//! validation layers; the `/scrq/jobs*` group additionally goes through
//! the rate limiter. Job routes are mounted only when the queue
//! subsystem is enabled.

use axum::extract::DefaultBodyLimit;
use axum::middleware as axum_middleware;
use axum::routing::{get, post};
use axum::Router;

use super::handlers::{jobs, system, ws, AppState};
use super::middleware;

/// Maximum accepted request body size (10 MiB).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let mut scrq = Router::new()
        .route("/scrq/browser/status", get(system::browser_status));

    if state.manager.is_some() {
        let job_routes = Router::new()
            .route("/scrq/jobs", post(jobs::create_job))
            .route("/scrq/jobs/:job_id", get(jobs::get_job_status))
            .route("/scrq/jobs/:job_id/result", get(jobs::get_job_result))
            .route("/scrq/jobs/:job_id/cancel", post(jobs::cancel_job))
            .route("/scrq/jobs/:job_id/events", get(jobs::job_events))
            .route_layer(axum_middleware::from_fn_with_state(
                state.clone(),
                middleware::rate_limit,
            ));

        scrq = scrq
            .merge(job_routes)
            .route("/scrq/ws", get(ws::ws_handler));
    }

    let scrq = scrq
        .route_layer(axum_middleware::from_fn(middleware::validate_request))
        .route_layer(axum_middleware::from_fn(middleware::security_headers))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::ip_allowlist,
        ));

    Router::new()
        .route("/health", get(system::health))
        .merge(scrq)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
