//! Canonical in-memory job store
//!
//! Owns every job record plus the idempotency-key secondary index.
//! Mutations are serialized under one lock so the two maps never drift
//! apart; readers get value snapshots. Expired jobs are invisible to all
//! readers and physically removed by the hourly TTL sweep.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::AppError;

use super::job::Job;

/// Interval between TTL sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<String, Job>,
    /// idempotency_key -> job_id
    idempotency: HashMap<String, String>,
}

/// In-memory job store with TTL support.
#[derive(Default)]
pub struct JobStore {
    inner: RwLock<StoreInner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new job. Fails if the id is already present.
    pub fn save(&self, job: &Job) -> Result<(), AppError> {
        let mut inner = self.inner.write();
        if inner.jobs.contains_key(&job.id) {
            return Err(AppError::conflict(format!("job already exists: {}", job.id)));
        }
        if let Some(key) = &job.idempotency_key {
            if !key.is_empty() {
                inner.idempotency.insert(key.clone(), job.id.clone());
            }
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    /// Get a job snapshot by id. Expired jobs are reported as not found.
    pub fn get(&self, job_id: &str) -> Result<Job, AppError> {
        let inner = self.inner.read();
        match inner.jobs.get(job_id) {
            Some(job) if !job.is_expired() => Ok(job.clone()),
            _ => Err(AppError::not_found(format!("job not found: {job_id}"))),
        }
    }

    /// Get the live job for an idempotency key, if any.
    pub fn get_by_idempotency_key(&self, key: &str) -> Option<Job> {
        let inner = self.inner.read();
        let job_id = inner.idempotency.get(key)?;
        inner
            .jobs
            .get(job_id)
            .filter(|job| !job.is_expired())
            .cloned()
    }

    /// Replace a job by id.
    ///
    /// Terminal states are frozen: once the stored job is succeeded,
    /// failed, or canceled, any write carrying a different state is
    /// rejected with `Conflict`. This is what makes cancellation win the
    /// race against a worker's in-flight terminal write.
    pub fn update(&self, job: &Job) -> Result<(), AppError> {
        let mut inner = self.inner.write();
        let Some(existing) = inner.jobs.get(&job.id) else {
            return Err(AppError::not_found(format!("job not found: {}", job.id)));
        };
        if existing.status.is_terminal() {
            return Err(AppError::conflict(format!(
                "job {} is already {}",
                job.id, existing.status
            )));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    /// Remove a job and any idempotency mapping that points to it.
    pub fn delete(&self, job_id: &str) {
        let mut inner = self.inner.write();
        if let Some(job) = inner.jobs.remove(job_id) {
            if let Some(key) = &job.idempotency_key {
                inner.idempotency.remove(key);
            }
        }
    }

    /// Snapshot of all non-expired jobs.
    pub fn list(&self) -> Vec<Job> {
        let inner = self.inner.read();
        inner
            .jobs
            .values()
            .filter(|job| !job.is_expired())
            .cloned()
            .collect()
    }

    /// Remove every expired job together with its idempotency mapping.
    /// Returns the number of jobs removed.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .jobs
            .values()
            .filter(|job| job.is_expired())
            .map(|job| job.id.clone())
            .collect();

        for job_id in &expired {
            if let Some(job) = inner.jobs.remove(job_id) {
                if let Some(key) = &job.idempotency_key {
                    inner.idempotency.remove(key);
                }
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "cleaned up expired jobs");
        }
        expired.len()
    }

    /// Spawn the hourly TTL sweep task. Stops on the shutdown signal.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = store.sweep_expired();
                        debug!(removed, "job store TTL sweep");
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::job::{JobRequest, JobStatus};

    fn job() -> Job {
        Job::new(JobRequest {
            url: "https://example.com".to_string(),
            ..Default::default()
        })
    }

    fn job_with_key(key: &str) -> Job {
        Job::new(JobRequest {
            url: "https://example.com".to_string(),
            idempotency_key: Some(key.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn save_and_get_round_trip() {
        let store = JobStore::new();
        let job = job();
        store.save(&job).unwrap();

        let loaded = store.get(&job.id).unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.status, JobStatus::Queued);
    }

    #[test]
    fn save_rejects_duplicate_id() {
        let store = JobStore::new();
        let job = job();
        store.save(&job).unwrap();
        assert!(matches!(store.save(&job), Err(AppError::Conflict(_))));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(store.get("job_nope"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn idempotency_key_maps_to_live_job() {
        let store = JobStore::new();
        let job = job_with_key("key-1");
        store.save(&job).unwrap();

        let found = store.get_by_idempotency_key("key-1").unwrap();
        assert_eq!(found.id, job.id);
        assert!(store.get_by_idempotency_key("key-2").is_none());
    }

    #[test]
    fn expired_job_is_invisible() {
        let store = JobStore::new();
        let mut job = job_with_key("key-1");
        store.save(&job).unwrap();

        job.expires_at = chrono::Utc::now().timestamp() - 10;
        // Bypass the public API to backdate expiry.
        store.inner.write().jobs.insert(job.id.clone(), job.clone());

        assert!(matches!(store.get(&job.id), Err(AppError::NotFound(_))));
        assert!(store.get_by_idempotency_key("key-1").is_none());
        assert!(store.list().is_empty());
    }

    #[test]
    fn update_replaces_live_job() {
        let store = JobStore::new();
        let mut job = job();
        store.save(&job).unwrap();

        job.set_status(JobStatus::Running);
        job.set_progress(50, "halfway");
        store.update(&job).unwrap();

        let loaded = store.get(&job.id).unwrap();
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.progress, 50);
    }

    #[test]
    fn update_unknown_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(store.update(&job()), Err(AppError::NotFound(_))));
    }

    #[test]
    fn terminal_state_freezes_the_job() {
        let store = JobStore::new();
        let mut job = job();
        store.save(&job).unwrap();

        job.set_status(JobStatus::Canceled);
        store.update(&job).unwrap();

        // A worker finishing late must not overwrite the cancellation.
        let mut late_write = job.clone();
        late_write.set_result(serde_json::json!({"title": "too late"}));
        assert!(matches!(
            store.update(&late_write),
            Err(AppError::Conflict(_))
        ));

        assert_eq!(store.get(&job.id).unwrap().status, JobStatus::Canceled);
    }

    #[test]
    fn delete_removes_idempotency_mapping() {
        let store = JobStore::new();
        let job = job_with_key("key-1");
        store.save(&job).unwrap();

        store.delete(&job.id);
        assert!(store.get(&job.id).is_err());
        assert!(store.get_by_idempotency_key("key-1").is_none());
    }

    #[test]
    fn sweep_removes_expired_jobs_and_keys() {
        let store = JobStore::new();
        let live = job();
        store.save(&live).unwrap();

        let mut expired = job_with_key("key-old");
        store.save(&expired).unwrap();
        expired.expires_at = chrono::Utc::now().timestamp() - 10;
        store
            .inner
            .write()
            .jobs
            .insert(expired.id.clone(), expired.clone());

        assert_eq!(store.sweep_expired(), 1);
        assert!(store.get(&live.id).is_ok());
        assert!(store.get(&expired.id).is_err());
        assert!(store.get_by_idempotency_key("key-old").is_none());
        assert!(store.inner.read().idempotency.is_empty());
    }
}
