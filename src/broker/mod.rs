//! Durable work queue port
//!
//! Abstracts the at-least-once message queue the job lifecycle engine
//! runs on: publish durably, fetch with a wait budget, and settle every
//! delivery with exactly one ack or nak. The embedded file-backed
//! implementation lives in [`file`]; an externally supervised queue
//! server can stand in behind the same trait.

pub mod file;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use file::FileBroker;

/// Queue failures.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("broker serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("broker is closed")]
    Closed,
}

/// Broker configuration, mirroring a work-queue stream with explicit acks.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Storage directory for the journal.
    pub store_dir: std::path::PathBuf,
    /// Messages older than this are dropped (24 hours).
    pub max_age: Duration,
    /// Maximum deliveries per message before it is dropped.
    pub max_deliver: u32,
    /// How long a fetched message may stay unacked before redelivery.
    pub ack_wait: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            store_dir: std::path::PathBuf::from("./data/nats"),
            max_age: Duration::from_secs(24 * 60 * 60),
            max_deliver: 3,
            ack_wait: Duration::from_secs(5 * 60),
        }
    }
}

/// One fetched message. Must be settled with exactly one `ack` or `nak`.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Broker-assigned sequence number.
    pub seq: u64,
    /// Subject the message was published under.
    pub subject: String,
    /// Opaque message payload.
    pub payload: Vec<u8>,
    /// How many times this message has been delivered, this one included.
    pub deliveries: u32,
}

/// Durable at-least-once work queue.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Durably store a message; returns only after persistence.
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Block up to `wait` for up to `max` messages.
    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BrokerError>;

    /// Remove a delivered message from the queue.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError>;

    /// Return a delivered message to the queue, redelivering after `delay`.
    async fn nak(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError>;

    /// Flush state and wake any blocked fetchers.
    async fn close(&self);
}
