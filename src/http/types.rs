//! HTTP API request/response types
//!
//! JSON-serializable envelopes and DTOs for the REST API.

use serde::{Deserialize, Serialize};

/// Standard response envelope: `{success, data?, error?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Event stream URLs returned on job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEventUrls {
    pub sse_url: String,
    pub ws_url: String,
}

/// Response body for a created (or replayed) job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobCreatedResponse {
    pub job_id: String,
    pub status: crate::queue::JobStatus,
    pub status_url: String,
    pub result_url: String,
    pub events: JobEventUrls,
}

impl JobCreatedResponse {
    pub fn new(base_url: &str, job_id: &str, status: crate::queue::JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            status_url: format!("{base_url}/scrq/jobs/{job_id}"),
            result_url: format!("{base_url}/scrq/jobs/{job_id}/result"),
            events: JobEventUrls {
                sse_url: format!("{base_url}/scrq/jobs/{job_id}/events"),
                ws_url: format!("{base_url}/scrq/ws?job_id={job_id}"),
            },
        }
    }
}

/// Response body for a completed job's result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultResponse {
    pub job_id: String,
    pub status: crate::queue::JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query parameters for the WebSocket endpoint.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub job_id: String,
}
