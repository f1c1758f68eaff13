//! Job model: the unit of work the system schedules and reports on.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Default per-attempt wall-clock budget.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30);
/// Default maximum retry attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default time-to-live for job results (7 days).
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Base delay before the first retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Cap applied to the exponential backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);
/// Default job priority (1-10 scale).
pub const DEFAULT_PRIORITY: u8 = 5;

/// Lifecycle state of a job. Terminal states are frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Retrying,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    /// Wire name of the status, matching the JSON representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    #[default]
    Scrape,
}

/// Notification settings for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    /// Secret for the HMAC signature header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub websocket: bool,
}

/// Retry settings for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts.
    #[serde(default)]
    pub max_retries: u32,
    /// Initial delay between retries, in seconds.
    #[serde(default)]
    pub retry_delay: u64,
    /// Exponential backoff multiplier.
    #[serde(default)]
    pub backoff_factor: f64,
}

/// Cookie parameters forwarded to the browser engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

/// Detailed per-stage progress breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_items: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// The immutable payload a job is created from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(rename = "type", default)]
    pub job_type: JobType,
    #[serde(default)]
    pub url: String,
    /// Additional URLs for batch operations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    /// Browser engine: "lightpanda" (default) or "chrome".
    #[serde(default)]
    pub engine: String,
    /// Per-attempt timeout in seconds.
    #[serde(default)]
    pub timeout: u64,
    #[serde(default)]
    pub wait_for_load: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<CookieParam>,
    /// Outbound proxy; only supported by the chrome engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// 1-10, higher is more urgent.
    #[serde(default)]
    pub priority: u8,
    /// Result TTL in seconds.
    #[serde(default)]
    pub result_ttl: u64,
}

/// A queued job and everything observable about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "job_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_info: Option<ProgressInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub request: JobRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// When the job (and its result) will be purged.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<NotifyConfig>,
    pub retry_count: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub priority: u8,
    /// Per-attempt timeout in seconds.
    pub timeout: u64,
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn generate_job_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("job_{}", &uuid[..8])
}

impl Job {
    /// Create a new queued job from a request, applying defaults.
    pub fn new(request: JobRequest) -> Self {
        let now = now_unix();

        let timeout = if request.timeout > 0 {
            request.timeout
        } else {
            DEFAULT_JOB_TIMEOUT.as_secs()
        };

        let max_retries = match &request.retry {
            Some(retry) if retry.max_retries > 0 => retry.max_retries,
            _ => DEFAULT_MAX_RETRIES,
        };

        let result_ttl = if request.result_ttl > 0 {
            Duration::from_secs(request.result_ttl)
        } else {
            DEFAULT_RESULT_TTL
        };
        let expires_at = now + result_ttl.as_secs() as i64;

        let priority = if request.priority > 0 {
            request.priority
        } else {
            DEFAULT_PRIORITY
        };

        Self {
            id: generate_job_id(),
            job_type: request.job_type,
            status: JobStatus::Queued,
            progress: 0,
            progress_info: None,
            message: String::new(),
            notify: request.notify.clone(),
            result: None,
            error: String::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            expires_at,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            last_error: String::new(),
            idempotency_key: request.idempotency_key.clone(),
            priority,
            timeout,
            request,
        }
    }

    /// Update the job status, stamping started/completed timestamps.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = now_unix();

        if status == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now_unix());
        }
        if status.is_terminal() {
            self.completed_at = Some(now_unix());
        }
    }

    /// Update the progress percentage and message.
    pub fn set_progress(&mut self, progress: u8, message: impl Into<String>) {
        self.progress = progress.min(100);
        self.message = message.into();
        self.updated_at = now_unix();
    }

    /// Record a successful result and move to the terminal state.
    pub fn set_result(&mut self, result: serde_json::Value) {
        self.result = Some(result);
        self.status = JobStatus::Succeeded;
        self.progress = 100;
        self.completed_at = Some(now_unix());
        self.updated_at = now_unix();
    }

    /// Record a permanent failure.
    pub fn set_error(&mut self, err: impl Into<String>) {
        let err = err.into();
        self.error = err.clone();
        self.last_error = err;
        self.status = JobStatus::Failed;
        self.completed_at = Some(now_unix());
        self.updated_at = now_unix();
    }

    /// Whether another attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Move the job into the retrying state and schedule the next attempt
    /// with exponential backoff.
    pub fn prepare_retry(&mut self) {
        self.retry_count += 1;
        self.status = JobStatus::Retrying;
        self.next_retry_at = Some(now_unix() + self.retry_delay().as_secs() as i64);
        self.updated_at = now_unix();
    }

    /// Backoff delay for the current retry count:
    /// `base_delay * backoff_factor^(retry_count - 1)`, capped at
    /// [`MAX_RETRY_DELAY`].
    pub fn retry_delay(&self) -> Duration {
        let backoff_factor = match &self.request.retry {
            Some(retry) if retry.backoff_factor > 0.0 => retry.backoff_factor,
            _ => 2.0,
        };
        let base_delay = match &self.request.retry {
            Some(retry) if retry.retry_delay > 0 => Duration::from_secs(retry.retry_delay),
            _ => DEFAULT_RETRY_DELAY,
        };

        let mut delay = base_delay;
        for _ in 1..self.retry_count {
            delay = Duration::from_secs_f64(delay.as_secs_f64() * backoff_factor);
        }

        delay.min(MAX_RETRY_DELAY)
    }

    /// Whether the job's result TTL has elapsed.
    pub fn is_expired(&self) -> bool {
        self.expires_at != 0 && now_unix() > self.expires_at
    }

    /// Per-attempt wall-clock budget.
    pub fn timeout_duration(&self) -> Duration {
        if self.timeout > 0 {
            Duration::from_secs(self.timeout)
        } else {
            DEFAULT_JOB_TIMEOUT
        }
    }

    /// Serialize the job as the broker message payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, AppError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize a job snapshot from a broker message payload.
    pub fn from_payload(data: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(data)?)
    }
}
