//! Queue manager: the heart of the job lifecycle engine
//!
//! Composes the job store, event hub, broker, and webhook dispatcher.
//! Owns the dispatch loop that pulls messages off the queue, drives
//! attempts with per-job timeouts, schedules retries with exponential
//! backoff, and drains cancellations.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Delivery};
use crate::error::AppError;
use crate::webhook::WebhookDispatcher;

use super::events::{Event, EventHub, Subscription};
use super::job::{Job, JobStatus};
use super::processor::{JobProcessor, ProgressUpdate};
use super::store::JobStore;

/// Subject job messages are published under.
pub const JOB_SUBJECT: &str = "scrq.jobs";

/// How long each dispatch iteration waits for a message.
const FETCH_WAIT: Duration = Duration::from_secs(5);

/// Backoff after a queue fetch error.
const FETCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Orchestrates the job lifecycle end to end.
pub struct QueueManager {
    broker: Arc<dyn Broker>,
    store: Arc<JobStore>,
    events: EventHub,
    webhooks: WebhookDispatcher,
}

impl QueueManager {
    pub fn new(broker: Arc<dyn Broker>, store: Arc<JobStore>, events: EventHub) -> Self {
        Self {
            broker,
            store,
            events,
            webhooks: WebhookDispatcher::new(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Save a job, publish it to the queue, and announce it.
    pub async fn enqueue(&self, job: &Job) -> Result<(), AppError> {
        self.store.save(job)?;

        let payload = job.to_payload()?;
        self.broker
            .publish(JOB_SUBJECT, &payload)
            .await
            .map_err(|err| AppError::Broker(format!("failed to publish job: {err}")))?;

        self.events.emit(
            &job.id,
            Event {
                job_id: job.id.clone(),
                status: job.status,
                progress: job.progress,
                message: "Job queued".to_string(),
            },
        );
        Ok(())
    }

    /// Enqueue unless a live job already exists for the idempotency key.
    ///
    /// The store is authoritative: a hit returns the existing job without
    /// publishing a second message.
    pub async fn enqueue_with_idempotency(&self, job: Job) -> Result<(Job, bool), AppError> {
        if let Some(key) = job.idempotency_key.as_deref().filter(|k| !k.is_empty()) {
            if let Some(existing) = self.store.get_by_idempotency_key(key) {
                return Ok((existing, true));
            }
        }

        self.enqueue(&job).await?;
        Ok((job, false))
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job, AppError> {
        self.store.get(job_id)
    }

    /// Persist a job mutation and emit the matching event.
    pub fn update_job(&self, job: &Job) -> Result<(), AppError> {
        self.store.update(job)?;
        self.events.emit(
            &job.id,
            Event {
                job_id: job.id.clone(),
                status: job.status,
                progress: job.progress,
                message: job.message.clone(),
            },
        );
        Ok(())
    }

    /// Cancel a queued or running job.
    ///
    /// Cancellation is soft: no message is removed from the queue. The
    /// dispatch loop observes the canceled state on next delivery and
    /// acks it without running the processor.
    pub fn cancel_job(&self, job_id: &str) -> Result<Job, AppError> {
        let mut job = self.store.get(job_id)?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Running) {
            return Err(AppError::conflict(format!(
                "cannot cancel job with status: {}",
                job.status
            )));
        }

        job.set_status(JobStatus::Canceled);
        self.store.update(&job)?;
        self.events.emit(
            &job.id,
            Event {
                job_id: job.id.clone(),
                status: JobStatus::Canceled,
                progress: job.progress,
                message: "Job canceled".to_string(),
            },
        );
        Ok(job)
    }

    /// Subscribe to a job's event stream.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        self.events.subscribe(job_id)
    }

    /// Start the dispatch loop: the sole consumer of the queue.
    pub fn start(
        self: Arc<Self>,
        processor: Arc<dyn JobProcessor>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            info!("job queue worker started");
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    fetched = manager.broker.fetch(1, FETCH_WAIT) => match fetched {
                        Ok(deliveries) => {
                            for delivery in deliveries {
                                manager.process_delivery(delivery, processor.as_ref()).await;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "queue fetch failed");
                            tokio::time::sleep(FETCH_ERROR_BACKOFF).await;
                        }
                    }
                }
            }
            info!("job queue worker stopped");
        })
    }

    /// Handle one delivery end to end. Every path settles the message
    /// with exactly one ack or nak.
    async fn process_delivery(&self, delivery: Delivery, processor: &dyn JobProcessor) {
        let snapshot = match Job::from_payload(&delivery.payload) {
            Ok(job) => job,
            Err(err) => {
                error!(error = %err, "failed to deserialize job payload");
                self.nak(&delivery, Duration::ZERO).await;
                return;
            }
        };

        // The store copy, not the message payload, is the source of truth
        // for status and retry bookkeeping.
        let mut job = match self.store.get(&snapshot.id) {
            Ok(job) => job,
            Err(err) => {
                warn!(job_id = %snapshot.id, error = %err, "job missing from store");
                self.nak(&delivery, Duration::ZERO).await;
                return;
            }
        };

        if job.status == JobStatus::Canceled {
            debug!(job_id = %job.id, "draining canceled job");
            self.ack(&delivery).await;
            return;
        }

        if job.status == JobStatus::Retrying {
            if let Some(next_retry_at) = job.next_retry_at {
                let now = chrono::Utc::now().timestamp();
                if next_retry_at > now {
                    let delay = Duration::from_secs((next_retry_at - now) as u64);
                    debug!(job_id = %job.id, ?delay, "retry not due yet");
                    self.nak(&delivery, delay).await;
                    return;
                }
            }
        }

        job.set_status(JobStatus::Running);
        job.set_progress(0, "Processing started");
        if let Err(err) = self.update_job(&job) {
            // Canceled between fetch and the running transition.
            debug!(job_id = %job.id, error = %err, "job no longer runnable");
            self.ack(&delivery).await;
            return;
        }

        let job_id = job.id.clone();
        let progress = move |update: ProgressUpdate| {
            let Ok(mut current) = self.store.get(&job_id) else {
                return;
            };
            current.set_progress(update.percent, update.message);
            if let Some(info) = update.info {
                current.progress_info = Some(info);
            }
            if let Err(err) = self.update_job(&current) {
                debug!(job_id = %current.id, error = %err, "progress write suppressed");
            }
        };

        let timeout = job.timeout_duration();
        let outcome = match tokio::time::timeout(timeout, processor.process(&job, &progress)).await
        {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "job timed out after {}s",
                timeout.as_secs()
            ))),
        };

        match outcome {
            Ok(result) => self.finish_success(&job.id, result).await,
            Err(err) => self.finish_failure(&job.id, err).await,
        }
        self.ack(&delivery).await;
    }

    async fn finish_success(&self, job_id: &str, result: serde_json::Value) {
        let Ok(mut job) = self.store.get(job_id) else {
            return;
        };
        job.set_result(result);
        match self.update_job(&job) {
            Ok(()) => {
                info!(job_id, "job succeeded");
                self.webhooks.fire(&job);
            }
            Err(AppError::Conflict(_)) => {
                debug!(job_id, "terminal write suppressed, job was canceled");
            }
            Err(err) => warn!(job_id, error = %err, "failed to record job result"),
        }
    }

    async fn finish_failure(&self, job_id: &str, err: AppError) {
        let Ok(mut job) = self.store.get(job_id) else {
            return;
        };

        if err.is_retriable() && job.can_retry() {
            job.last_error = err.to_string();
            job.prepare_retry();
            match self.store.update(&job) {
                Ok(()) => {
                    self.events.emit(
                        &job.id,
                        Event {
                            job_id: job.id.clone(),
                            status: job.status,
                            progress: job.progress,
                            message: format!(
                                "Retrying ({}/{}): {}",
                                job.retry_count, job.max_retries, err
                            ),
                        },
                    );
                    self.republish_for_retry(&job).await;
                }
                Err(AppError::Conflict(_)) => {
                    debug!(job_id, "retry suppressed, job was canceled");
                }
                Err(update_err) => {
                    warn!(job_id, error = %update_err, "failed to schedule retry");
                }
            }
            return;
        }

        job.set_error(err.to_string());
        match self.update_job(&job) {
            Ok(()) => {
                warn!(job_id, error = %err, "job failed");
                self.webhooks.fire(&job);
            }
            Err(AppError::Conflict(_)) => {
                debug!(job_id, "terminal write suppressed, job was canceled");
            }
            Err(update_err) => warn!(job_id, error = %update_err, "failed to record job error"),
        }
    }

    /// Publish a fresh message so the next attempt re-enters the dispatch
    /// loop after the backoff delay. A publish failure here is terminal
    /// for the job.
    async fn republish_for_retry(&self, job: &Job) {
        let payload = match job.to_payload() {
            Ok(payload) => payload,
            Err(err) => {
                error!(job_id = %job.id, error = %err, "failed to serialize retry payload");
                self.fail_permanently(job, "failed to re-enqueue for retry").await;
                return;
            }
        };

        if let Err(err) = self.broker.publish(JOB_SUBJECT, &payload).await {
            error!(job_id = %job.id, error = %err, "failed to re-enqueue job for retry");
            self.fail_permanently(job, "failed to re-enqueue for retry").await;
        }
    }

    async fn fail_permanently(&self, job: &Job, reason: &str) {
        let Ok(mut dead) = self.store.get(&job.id) else {
            return;
        };
        dead.set_error(format!("{reason}: {}", dead.last_error));
        if self.update_job(&dead).is_ok() {
            self.webhooks.fire(&dead);
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(err) = self.broker.ack(delivery).await {
            warn!(seq = delivery.seq, error = %err, "failed to ack message");
        }
    }

    async fn nak(&self, delivery: &Delivery, delay: Duration) {
        if let Err(err) = self.broker.nak(delivery, delay).await {
            warn!(seq = delivery.seq, error = %err, "failed to nak message");
        }
    }
}
