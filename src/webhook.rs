//! Webhook dispatcher
//!
//! Fire-and-forget POST of terminal job status to a user-provided URL.
//! Payloads are optionally signed with HMAC-SHA256. Delivery failures are
//! logged and never retried.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::queue::job::Job;
use crate::security::sign_payload;

/// Request timeout for webhook deliveries.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends terminal-status notifications without blocking the dispatcher.
pub struct WebhookDispatcher {
    client: reqwest::Client,
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookDispatcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Build the notification body for a job's terminal state.
    pub fn build_payload(job: &Job) -> serde_json::Value {
        json!({
            "job_id": job.id,
            "status": job.status,
            "result_url": format!("/scrq/jobs/{}/result", job.id),
            "finished_at": chrono::Utc::now().timestamp(),
        })
    }

    /// Fire the webhook for a job, if one is configured. Returns
    /// immediately; delivery happens on a spawned task.
    pub fn fire(&self, job: &Job) {
        let Some(notify) = &job.notify else {
            return;
        };
        let Some(url) = notify.webhook_url.clone().filter(|u| !u.is_empty()) else {
            return;
        };

        let body = match serde_json::to_vec(&Self::build_payload(job)) {
            Ok(body) => body,
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "failed to serialize webhook payload");
                return;
            }
        };

        let signature = notify
            .webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|secret| sign_payload(&body, secret));

        let client = self.client.clone();
        let job_id = job.id.clone();
        let event = format!("job.{}", job.status);

        tokio::spawn(async move {
            let mut request = client
                .post(&url)
                .header("Content-Type", "application/json")
                .header("X-Scrq-Event", &event)
                .body(body);
            if let Some(signature) = signature {
                request = request.header("X-Scrq-Signature", signature);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(job_id, event, "webhook delivered");
                }
                Ok(response) => {
                    warn!(job_id, status = %response.status(), "webhook returned error status");
                }
                Err(err) => {
                    warn!(job_id, error = %err, "failed to send webhook");
                }
            }
        });
    }
}
