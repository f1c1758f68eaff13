//! Idempotency cache and signing helpers
//!
//! Maps client-provided idempotency keys to the response that was served
//! for them, so replays short-circuit at the HTTP edge. The job store
//! remains authoritative; this cache only shapes responses.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Interval between expired-entry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A cached idempotent response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub key: String,
    pub job_id: String,
    pub response: serde_json::Value,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Key -> cached-response map with absolute expiry.
pub struct IdempotencyCache {
    entries: DashMap<String, IdempotencyEntry>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Look up a key, returning the entry only while it is unexpired.
    pub fn check(&self, key: &str) -> Option<IdempotencyEntry> {
        let entry = self.entries.get(key)?;
        if chrono::Utc::now().timestamp() > entry.expires_at {
            return None;
        }
        Some(entry.clone())
    }

    /// Cache the response served for a key.
    pub fn store(&self, key: &str, job_id: &str, response: serde_json::Value) {
        self.store_at(key, job_id, response, chrono::Utc::now().timestamp());
    }

    fn store_at(&self, key: &str, job_id: &str, response: serde_json::Value, now: i64) {
        self.entries.insert(
            key.to_string(),
            IdempotencyEntry {
                key: key.to_string(),
                job_id: job_id.to_string(),
                response,
                created_at: now,
                expires_at: now + self.ttl.as_secs() as i64,
            },
        );
    }

    /// Remove a key.
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove expired entries; returns the number removed.
    pub fn sweep_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.expires_at);
        before - self.entries.len()
    }

    /// Spawn the periodic expired-entry sweep task.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.sweep_expired();
                        debug!(removed, "idempotency cache sweep");
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

/// Hex HMAC-SHA256 signature for a webhook payload.
pub fn sign_payload(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a webhook signature.
pub fn verify_signature(payload: &[u8], signature: &str, secret: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

/// Generate a unique request identifier for tracing headers.
pub fn generate_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}
