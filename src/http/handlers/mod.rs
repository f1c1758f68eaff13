//! HTTP handlers and shared application state

pub mod jobs;
pub mod system;
pub mod ws;

use std::collections::HashSet;
use std::sync::Arc;

use crate::browser::BrowserClient;
use crate::error::AppError;
use crate::queue::QueueManager;
use crate::security::{IdempotencyCache, RateLimiter};

/// Shared state for all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Queue manager; `None` when the job queue is disabled.
    pub manager: Option<Arc<QueueManager>>,
    pub idempotency: Arc<IdempotencyCache>,
    pub limiter: Arc<RateLimiter>,
    /// Lightweight engine reported by the browser status endpoint.
    pub browser: Option<Arc<dyn BrowserClient>>,
    /// Base URL prefixed onto URLs in API responses.
    pub base_url: String,
    /// Optional IP allow-list; empty means every peer is allowed.
    pub allowed_ips: Arc<HashSet<String>>,
}

impl AppState {
    /// The queue manager, or an error when the queue subsystem is off.
    pub fn queue(&self) -> Result<&Arc<QueueManager>, AppError> {
        self.manager
            .as_ref()
            .ok_or_else(|| AppError::internal("job queue is not enabled"))
    }
}
