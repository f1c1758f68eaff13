//! HTTP surface tests
//!
//! Exercise the router in-process: envelopes, status codes, security and
//! rate-limit headers, idempotent replay, and the SSE snapshot frame.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::util::ServiceExt;

use scrq::broker::{BrokerConfig, FileBroker};
use scrq::http::{create_router, AppState};
use scrq::queue::{EventHub, JobStore, QueueManager};
use scrq::security::{IdempotencyCache, RateLimitConfig, RateLimiter};

struct TestApp {
    router: Router,
    manager: Arc<QueueManager>,
    _dir: TempDir,
}

fn make_app(limit: usize, allowed_ips: &[&str]) -> TestApp {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(
        FileBroker::open(BrokerConfig {
            store_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap(),
    );
    let manager = Arc::new(QueueManager::new(
        broker,
        Arc::new(JobStore::new()),
        EventHub::new(),
    ));

    let state = AppState {
        manager: Some(manager.clone()),
        idempotency: Arc::new(IdempotencyCache::new(Duration::from_secs(3600))),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window: Duration::from_secs(60),
            burst_max: limit.max(20),
        })),
        browser: None,
        base_url: "http://localhost:8000".to_string(),
        allowed_ips: Arc::new(allowed_ips.iter().map(|ip| ip.to_string()).collect()),
    };

    TestApp {
        router: create_router(state),
        manager,
        _dir: dir,
    }
}

fn test_app_with_limit(limit: usize) -> TestApp {
    make_app(limit, &[])
}

fn test_app() -> TestApp {
    test_app_with_limit(100)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_returns_ok_envelope() {
    let app = test_app();
    let response = app.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");
    assert!(json["data"]["timestamp"].is_string());
}

#[tokio::test]
async fn browser_status_reports_missing_engine() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/scrq/browser/status"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["running"], false);
}

#[tokio::test]
async fn create_job_returns_202_with_urls() {
    let app = test_app();
    let response = app
        .router
        .oneshot(post_json(
            "/scrq/jobs",
            serde_json::json!({"url": "https://example.com"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Security and rate-limit headers ride on the job routes.
    let headers = response.headers().clone();
    assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(headers.get("x-frame-options").unwrap(), "DENY");
    assert!(headers.get("x-request-id").is_some());
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "100");
    assert!(headers.get("x-ratelimit-remaining").is_some());
    assert!(headers.get("x-ratelimit-reset").is_some());

    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    let data = &json["data"];
    let job_id = data["job_id"].as_str().unwrap();
    assert!(job_id.starts_with("job_"));
    assert_eq!(data["status"], "queued");
    assert_eq!(
        data["status_url"],
        format!("http://localhost:8000/scrq/jobs/{job_id}")
    );
    assert_eq!(
        data["events"]["sse_url"],
        format!("http://localhost:8000/scrq/jobs/{job_id}/events")
    );
    assert_eq!(
        data["events"]["ws_url"],
        format!("http://localhost:8000/scrq/ws?job_id={job_id}")
    );
}

#[tokio::test]
async fn create_job_requires_url() {
    let app = test_app();
    let response = app
        .router
        .oneshot(post_json("/scrq/jobs", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "URL is required");
}

#[tokio::test]
async fn create_job_rejects_malformed_body() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/scrq/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Invalid request body");
}

#[tokio::test]
async fn create_job_rejects_non_json_content_type() {
    let app = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/scrq/jobs")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("url=https://example.com"))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn create_job_clamps_priority() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/scrq/jobs",
            serde_json::json!({"url": "https://example.com", "priority": 99, "timeout": 900}),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();

    let status = app
        .router
        .oneshot(get(&format!("/scrq/jobs/{job_id}")))
        .await
        .unwrap();
    let json = body_json(status).await;
    assert_eq!(json["data"]["priority"], 5);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/scrq/jobs/job_missing"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn result_conflicts_before_completion() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/scrq/jobs",
            serde_json::json!({"url": "https://example.com"}),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();

    let response = app
        .router
        .oneshot(get(&format!("/scrq/jobs/{job_id}/result")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_then_status_shows_canceled() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/scrq/jobs",
            serde_json::json!({"url": "https://example.com"}),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            &format!("/scrq/jobs/{job_id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "canceled");

    let response = app
        .router
        .clone()
        .oneshot(get(&format!("/scrq/jobs/{job_id}")))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "canceled");

    // Canceling a terminal job is a 400 at the surface.
    let response = app
        .router
        .oneshot(post_json(
            &format!("/scrq/jobs/{job_id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn idempotent_replay_returns_same_job() {
    let app = test_app();
    let make_request = || {
        Request::builder()
            .method("POST")
            .uri("/scrq/jobs")
            .header(header::CONTENT_TYPE, "application/json")
            .header("X-Idempotency-Key", "replay-key")
            .body(Body::from(
                serde_json::json!({"url": "https://example.com"}).to_string(),
            ))
            .unwrap()
    };

    let first = app.router.clone().oneshot(make_request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert!(first.headers().get("x-idempotency-hit").is_none());
    let first_json = body_json(first).await;

    let second = app.router.oneshot(make_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::ACCEPTED);
    assert_eq!(second.headers().get("x-idempotency-hit").unwrap(), "true");
    let second_json = body_json(second).await;

    assert_eq!(first_json["data"]["job_id"], second_json["data"]["job_id"]);
}

#[tokio::test]
async fn idempotency_key_from_body_field() {
    let app = test_app();
    let body = serde_json::json!({
        "url": "https://example.com",
        "idempotency_key": "body-key",
    });

    let first = app
        .router
        .clone()
        .oneshot(post_json("/scrq/jobs", body.clone()))
        .await
        .unwrap();
    let first_json = body_json(first).await;

    let second = app
        .router
        .oneshot(post_json("/scrq/jobs", body))
        .await
        .unwrap();
    assert_eq!(second.headers().get("x-idempotency-hit").unwrap(), "true");
    let second_json = body_json(second).await;

    assert_eq!(first_json["data"]["job_id"], second_json["data"]["job_id"]);
}

#[tokio::test]
async fn rate_limit_exhaustion_returns_429() {
    let app = test_app_with_limit(3);

    for _ in 0..3 {
        let request = Request::builder()
            .uri("/scrq/jobs/job_any")
            .header("X-User-ID", "tenant-1")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    let request = Request::builder()
        .uri("/scrq/jobs/job_any")
        .header("X-User-ID", "tenant-1")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let headers = response.headers().clone();
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    let retry_after: u64 = headers
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0);

    let json = body_json(response).await;
    assert_eq!(json["success"], false);

    // A different client is unaffected.
    let request = Request::builder()
        .uri("/scrq/jobs/job_any")
        .header("X-User-ID", "tenant-2")
        .body(Body::empty())
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();
    assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn ip_allowlist_blocks_unlisted_peer() {
    let app = make_app(100, &["10.0.0.1"]);

    let peer: SocketAddr = "192.168.1.9:40000".parse().unwrap();
    let request = Request::builder()
        .uri("/scrq/browser/status")
        .extension(ConnectInfo(peer))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Access denied");

    // A request with no identifiable peer is denied as well.
    let response = app
        .router
        .clone()
        .oneshot(get("/scrq/browser/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Health is outside the allow-listed group.
    let response = app.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ip_allowlist_admits_listed_peer() {
    let app = make_app(100, &["10.0.0.1"]);

    let peer: SocketAddr = "10.0.0.1:40000".parse().unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/scrq/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .extension(ConnectInfo(peer))
        .body(Body::from(
            serde_json::json!({"url": "https://example.com"}).to_string(),
        ))
        .unwrap();
    let response = app.router.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn sse_snapshot_closes_for_completed_job() {
    let app = test_app();

    let response = app
        .router
        .clone()
        .oneshot(post_json(
            "/scrq/jobs",
            serde_json::json!({"url": "https://example.com"}),
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    let job_id = json["data"]["job_id"].as_str().unwrap().to_string();

    // Complete the job out of band.
    let mut job = app.manager.get_job(&job_id).unwrap();
    job.set_status(scrq::queue::JobStatus::Running);
    app.manager.update_job(&job).unwrap();
    job.set_result(serde_json::json!({"title": "Example"}));
    app.manager.update_job(&job).unwrap();

    let response = app
        .router
        .oneshot(get(&format!("/scrq/jobs/{job_id}/events")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");

    // Terminal job: the stream holds exactly the snapshot frame and ends.
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.starts_with("data: "), "frame: {text}");
    assert!(text.contains("succeeded"));
    assert!(text.ends_with("\n\n"));
}

#[tokio::test]
async fn sse_for_unknown_job_is_404() {
    let app = test_app();
    let response = app
        .router
        .oneshot(get("/scrq/jobs/job_missing/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_routes_absent_when_queue_disabled() {
    let state = AppState {
        manager: None,
        idempotency: Arc::new(IdempotencyCache::new(Duration::from_secs(3600))),
        limiter: Arc::new(RateLimiter::new(RateLimitConfig::default())),
        browser: None,
        base_url: "http://localhost:8000".to_string(),
        allowed_ips: Arc::new(HashSet::new()),
    };
    let router = create_router(state);

    let response = router
        .clone()
        .oneshot(post_json(
            "/scrq/jobs",
            serde_json::json!({"url": "https://example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Health stays up regardless.
    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
