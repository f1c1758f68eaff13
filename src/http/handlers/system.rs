//! System handlers: health and browser status

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use super::super::types::ApiResponse;
use super::AppState;

/// Liveness probe.
/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Browser engine status.
/// GET /scrq/browser/status
pub async fn browser_status(State(state): State<AppState>) -> impl IntoResponse {
    let (running, endpoint) = match &state.browser {
        Some(browser) => (browser.is_running(), browser.endpoint()),
        None => (false, String::new()),
    };

    Json(ApiResponse::ok(json!({
        "running": running,
        "endpoint": endpoint,
    })))
}
