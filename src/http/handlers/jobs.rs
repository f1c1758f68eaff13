//! Job handlers: create, status, result, cancel, SSE events

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseFrame, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{debug, info};

use crate::error::AppError;
use crate::queue::{Event, Job, JobRequest, JobStatus};

use super::AppState;
use super::super::types::{ApiResponse, JobCreatedResponse, JobResultResponse};

/// Hard cap on the per-attempt timeout accepted from clients (seconds).
const MAX_TIMEOUT_SECS: u64 = 300;

/// Hard cap on retries accepted from clients.
const MAX_RETRIES: u32 = 5;

/// Resolve the idempotency key: header first, then body field.
fn idempotency_key(headers: &HeaderMap, request: &JobRequest) -> Option<String> {
    headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| {
            request
                .idempotency_key
                .clone()
                .filter(|k| !k.is_empty())
        })
}

fn with_idempotency_hit(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert("x-idempotency-hit", HeaderValue::from_static("true"));
    response
}

/// Create a new async job.
/// POST /scrq/jobs
pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<JobRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(mut request) =
        body.map_err(|_| AppError::validation("Invalid request body"))?;

    if request.url.is_empty() {
        return Err(AppError::validation("URL is required"));
    }

    let key = idempotency_key(&headers, &request);

    // Cached replay short-circuits response shaping; the store below
    // remains the source of truth for duplicates.
    if let Some(key) = &key {
        if let Some(entry) = state.idempotency.check(key) {
            debug!(key, "idempotency cache hit");
            let response =
                (StatusCode::ACCEPTED, Json(ApiResponse::ok(entry.response))).into_response();
            return Ok(with_idempotency_hit(response));
        }
    }

    request.idempotency_key = key.clone();
    if request.timeout > MAX_TIMEOUT_SECS {
        request.timeout = MAX_TIMEOUT_SECS;
    }
    if request.priority > 10 {
        request.priority = 0;
    }
    if let Some(retry) = request.retry.as_mut() {
        if retry.max_retries > MAX_RETRIES {
            retry.max_retries = MAX_RETRIES;
        }
    }

    let job = Job::new(request);
    let (job, was_duplicate) = state.queue()?.enqueue_with_idempotency(job).await?;

    info!(job_id = %job.id, duplicate = was_duplicate, "job accepted");

    let created = JobCreatedResponse::new(&state.base_url, &job.id, job.status);

    if let Some(key) = &key {
        if !was_duplicate {
            state
                .idempotency
                .store(key, &job.id, serde_json::to_value(&created)?);
        }
    }

    let response = (StatusCode::ACCEPTED, Json(ApiResponse::ok(created))).into_response();
    Ok(if was_duplicate {
        with_idempotency_hit(response)
    } else {
        response
    })
}

fn rfc3339(ts: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(ts, 0).map(|dt| dt.to_rfc3339())
}

/// Get the status of a job.
/// GET /scrq/jobs/{job_id}
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let job = state
        .queue()?
        .get_job(&job_id)
        .map_err(|_| AppError::not_found("Job not found"))?;

    let mut payload = json!({
        "job_id": job.id,
        "status": job.status,
        "progress": job.progress,
        "message": job.message,
        "created_at": job.created_at,
        "updated_at": job.updated_at,
        "priority": job.priority,
    });

    if let Some(info) = &job.progress_info {
        payload["progress_info"] = serde_json::to_value(info)?;
    }

    if job.status == JobStatus::Retrying || job.retry_count > 0 {
        payload["retry_info"] = json!({
            "retry_count": job.retry_count,
            "max_retries": job.max_retries,
            "last_error": job.last_error,
        });
        if let Some(at) = job.next_retry_at.and_then(rfc3339) {
            payload["next_retry_at"] = json!(at);
        }
    }

    if let Some(at) = rfc3339(job.expires_at) {
        payload["expires_at"] = json!(at);
    }

    Ok(Json(ApiResponse::ok(payload)).into_response())
}

/// Get the result of a completed job.
/// GET /scrq/jobs/{job_id}/result
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let job = state
        .queue()?
        .get_job(&job_id)
        .map_err(|_| AppError::not_found("Job not found"))?;

    if !matches!(job.status, JobStatus::Succeeded | JobStatus::Failed) {
        return Err(AppError::conflict("Job not completed yet"));
    }

    let body = JobResultResponse {
        job_id: job.id,
        status: job.status,
        result: job.result,
        error: (!job.error.is_empty()).then_some(job.error),
    };
    Ok(Json(ApiResponse::ok(body)).into_response())
}

/// Cancel a queued or running job.
/// POST /scrq/jobs/{job_id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let job = match state.queue()?.cancel_job(&job_id) {
        Ok(job) => job,
        // Surface contract: canceling a terminal job is a 400.
        Err(AppError::Conflict(message)) => return Err(AppError::Validation(message)),
        Err(AppError::NotFound(_)) => return Err(AppError::not_found("Job not found")),
        Err(err) => return Err(err),
    };

    Ok(Json(ApiResponse::ok(json!({
        "job_id": job.id,
        "status": job.status,
    })))
    .into_response())
}

fn sse_frame(event: &Event) -> Result<SseFrame, Infallible> {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Ok(SseFrame::default().data(data))
}

fn snapshot_event(job: &Job) -> Event {
    Event {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
        message: job.message.clone(),
    }
}

/// Stream job events via SSE.
/// GET /scrq/jobs/{job_id}/events
///
/// The current status is always the first frame, so clients subscribing
/// after completion still observe the outcome. The stream closes after a
/// terminal event.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let queue = state.queue()?;
    queue
        .get_job(&job_id)
        .map_err(|_| AppError::not_found("Job not found"))?;

    // Subscribe before snapshotting so no event can fall between them.
    let subscription = queue.subscribe(&job_id);
    let job = queue
        .get_job(&job_id)
        .map_err(|_| AppError::not_found("Job not found"))?;
    let first = snapshot_event(&job);

    let mut response = if job.status.is_terminal() {
        drop(subscription);
        let stream = stream::once(async move { sse_frame(&first) });
        Sse::new(stream).into_response()
    } else {
        let live = subscription
            .scan(false, |done, event| {
                if *done {
                    return futures::future::ready(None);
                }
                if event.status.is_terminal() {
                    *done = true;
                }
                futures::future::ready(Some(event))
            })
            .map(|event| sse_frame(&event));
        let stream = stream::once(async move { sse_frame(&first) }).chain(live);
        Sse::new(stream)
            .keep_alive(KeepAlive::default().interval(Duration::from_secs(15)))
            .into_response()
    };

    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(response)
}
