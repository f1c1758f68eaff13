//! Security and rate-limit middleware
//!
//! Every `/scrq/*` route passes through the security-headers layer; the
//! `/scrq/jobs*` routes additionally pass through the rate limiter.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::AppError;
use crate::security::generate_request_id;

use super::handlers::AppState;
use super::types::ApiResponse;

/// Client identifier for rate limiting: first non-empty of `X-User-ID`,
/// `X-API-Key`, or the peer IP.
fn client_id(request: &Request) -> String {
    for header in ["x-user-id", "x-api-key"] {
        if let Some(value) = request
            .headers()
            .get(header)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            return value.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn set_header(response: &mut Response, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(name), value);
    }
}

/// Sliding-window rate limiting with standard headers on every response.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_id(&request);

    if !state.limiter.allow(&client) {
        let info = state.limiter.info(&client);
        let retry_after = info.reset_after.as_secs().max(1);

        let mut response = AppError::RateLimited { retry_after }.into_response();
        set_header(&mut response, "x-ratelimit-limit", info.limit.to_string());
        set_header(&mut response, "x-ratelimit-remaining", "0".to_string());
        set_header(
            &mut response,
            "x-ratelimit-reset",
            (chrono::Utc::now().timestamp() + info.reset_after.as_secs() as i64).to_string(),
        );
        return response;
    }

    let mut response = next.run(request).await;

    let info = state.limiter.info(&client);
    set_header(&mut response, "x-ratelimit-limit", info.limit.to_string());
    set_header(
        &mut response,
        "x-ratelimit-remaining",
        info.remaining.to_string(),
    );
    set_header(
        &mut response,
        "x-ratelimit-reset",
        (chrono::Utc::now().timestamp() + info.reset_after.as_secs() as i64).to_string(),
    );
    response
}

/// Security headers plus a generated `X-Request-ID` on every response.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(generate_request_id);

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'self'"),
    );
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(HeaderName::from_static("x-request-id"), value);
    }

    response
}

/// Reject bodied requests that are not JSON.
pub async fn validate_request(request: Request, next: Next) -> Response {
    let method = request.method();
    if matches!(
        method.as_str(),
        "POST" | "PUT" | "PATCH"
    ) {
        let content_type = request
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.is_empty() && !content_type.starts_with("application/json") {
            return (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                Json(ApiResponse::<()>::error(
                    "Content-Type must be application/json",
                )),
            )
                .into_response();
        }
    }

    next.run(request).await
}

/// Optional IP allow-list: denies every peer not in the configured set.
/// A no-op when the list is empty.
pub async fn ip_allowlist(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.allowed_ips.is_empty() {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    match peer {
        Some(ip) if state.allowed_ips.contains(&ip) => next.run(request).await,
        _ => (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::<()>::error("Access denied")),
        )
            .into_response(),
    }
}
