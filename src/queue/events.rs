//! Per-job event fan-out
//!
//! Every job has any number of subscribers (SSE streams, WebSocket
//! connections). Publication is non-blocking: a subscriber that stops
//! draining its bounded buffer loses events without stalling the
//! publisher or other subscribers.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::job::JobStatus;

/// Buffered events per subscriber before drops kick in.
const SUBSCRIBER_BUFFER: usize = 10;

/// A progress/status event for one job. Transient, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
struct HubInner {
    subscribers: Mutex<HashMap<String, Vec<Slot>>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn unsubscribe(&self, job_id: &str, id: u64) {
        let mut subscribers = self.subscribers.lock();
        if let Some(slots) = subscribers.get_mut(job_id) {
            slots.retain(|slot| slot.id != id);
            if slots.is_empty() {
                subscribers.remove(job_id);
            }
        }
    }
}

/// Multi-subscriber event hub keyed by job id. Cheap to clone.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a subscription for one job's events.
    ///
    /// The subscription unsubscribes itself when dropped.
    pub fn subscribe(&self, job_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .subscribers
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push(Slot { id, tx });

        Subscription {
            hub: Arc::clone(&self.inner),
            job_id: job_id.to_string(),
            id,
            rx,
        }
    }

    /// Deliver an event to every subscriber of the job.
    ///
    /// Never blocks: subscribers with full buffers lose this event,
    /// everyone else receives it in emission order. Emitting for a job
    /// with zero subscribers is a no-op.
    pub fn emit(&self, job_id: &str, event: Event) {
        let mut subscribers = self.inner.subscribers.lock();
        let Some(slots) = subscribers.get_mut(job_id) else {
            return;
        };

        slots.retain(|slot| match slot.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(job_id, subscriber = slot.id, "event dropped for slow subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if slots.is_empty() {
            subscribers.remove(job_id);
        }
    }

    /// Close every subscription. Used on shutdown.
    pub fn close_all(&self) {
        self.inner.subscribers.lock().clear();
    }

    /// Number of active subscribers for a job.
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(job_id)
            .map(|slots| slots.len())
            .unwrap_or(0)
    }
}

/// A live subscription to one job's event stream.
pub struct Subscription {
    hub: Arc<HubInner>,
    job_id: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event; `None` once the hub closes the channel.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.job_id, self.id);
    }
}
