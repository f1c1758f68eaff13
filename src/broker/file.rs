//! Embedded file-backed work queue
//!
//! A single-process durable queue: every publish and ack is appended to a
//! JSON-lines journal, and on open the journal is replayed to rebuild the
//! set of unacked messages. Enqueued-but-unprocessed messages therefore
//! survive process restarts, which is the only persistence this service
//! carries.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{Broker, BrokerConfig, BrokerError, Delivery};

/// Journal file name inside the store directory.
const JOURNAL_FILE: &str = "scrq-jobs.journal";

/// Poll granularity for fetch timers (nak delays, ack-wait redelivery).
const FETCH_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalRecord {
    Publish {
        seq: u64,
        subject: String,
        /// Hex-encoded payload bytes.
        payload: String,
        published_at: i64,
    },
    Ack {
        seq: u64,
    },
}

struct StoredMsg {
    seq: u64,
    subject: String,
    payload: Vec<u8>,
    published_at: i64,
    deliveries: u32,
    /// Earliest instant this message may be delivered (nak delay).
    ready_at: Option<Instant>,
}

struct InFlight {
    msg: StoredMsg,
    delivered_at: Instant,
}

struct BrokerState {
    ready: VecDeque<StoredMsg>,
    pending: HashMap<u64, InFlight>,
    next_seq: u64,
    journal: File,
}

/// File-backed work queue with explicit acknowledgement.
pub struct FileBroker {
    config: BrokerConfig,
    state: Mutex<BrokerState>,
    notify: Notify,
    closed: AtomicBool,
}

impl FileBroker {
    /// Open (or create) the queue in the configured storage directory,
    /// replaying the journal to recover unacked messages.
    pub fn open(config: BrokerConfig) -> Result<Self, BrokerError> {
        std::fs::create_dir_all(&config.store_dir)?;
        let journal_path = config.store_dir.join(JOURNAL_FILE);

        let (live, next_seq) = Self::replay(&journal_path, config.max_age)?;

        // Compact: rewrite the journal with only the live messages.
        let mut journal = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&journal_path)?;
        for msg in &live {
            let record = JournalRecord::Publish {
                seq: msg.seq,
                subject: msg.subject.clone(),
                payload: hex::encode(&msg.payload),
                published_at: msg.published_at,
            };
            writeln!(journal, "{}", serde_json::to_string(&record)?)?;
        }
        journal.sync_data()?;

        if !live.is_empty() {
            info!(recovered = live.len(), "recovered unacked messages from journal");
        }

        Ok(Self {
            config,
            state: Mutex::new(BrokerState {
                ready: live.into(),
                pending: HashMap::new(),
                next_seq,
                journal,
            }),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn replay(path: &PathBuf, max_age: Duration) -> Result<(Vec<StoredMsg>, u64), BrokerError> {
        let mut messages: Vec<StoredMsg> = Vec::new();
        let mut next_seq = 1u64;

        let Ok(file) = File::open(path) else {
            return Ok((messages, next_seq));
        };

        let min_published = chrono::Utc::now().timestamp() - max_age.as_secs() as i64;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %err, "skipping corrupt journal line");
                    continue;
                }
            };
            match record {
                JournalRecord::Publish {
                    seq,
                    subject,
                    payload,
                    published_at,
                } => {
                    next_seq = next_seq.max(seq + 1);
                    if published_at < min_published {
                        debug!(seq, "dropping over-age message during replay");
                        continue;
                    }
                    let Ok(payload) = hex::decode(&payload) else {
                        warn!(seq, "skipping message with corrupt payload");
                        continue;
                    };
                    messages.push(StoredMsg {
                        seq,
                        subject,
                        payload,
                        published_at,
                        deliveries: 0,
                        ready_at: None,
                    });
                }
                JournalRecord::Ack { seq } => {
                    messages.retain(|msg| msg.seq != seq);
                }
            }
        }

        Ok((messages, next_seq))
    }

    fn append_ack(state: &mut BrokerState, seq: u64) -> Result<(), BrokerError> {
        let record = JournalRecord::Ack { seq };
        writeln!(state.journal, "{}", serde_json::to_string(&record)?)?;
        state.journal.sync_data()?;
        Ok(())
    }

    /// Pull ready messages, promoting timed-out pending deliveries first.
    fn take_ready(&self, state: &mut BrokerState, max: usize) -> Vec<Delivery> {
        let now = Instant::now();

        // Redeliver messages whose ack-wait expired.
        let expired: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, inflight)| now.duration_since(inflight.delivered_at) >= self.config.ack_wait)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in expired {
            if let Some(inflight) = state.pending.remove(&seq) {
                warn!(seq, "ack-wait expired, requeueing message");
                state.ready.push_back(inflight.msg);
            }
        }

        let mut out = Vec::new();
        let mut deferred: Vec<StoredMsg> = Vec::new();
        while out.len() < max {
            let Some(mut msg) = state.ready.pop_front() else {
                break;
            };
            if let Some(ready_at) = msg.ready_at {
                if now < ready_at {
                    deferred.push(msg);
                    continue;
                }
            }
            if msg.deliveries >= self.config.max_deliver {
                warn!(seq = msg.seq, deliveries = msg.deliveries, "max deliveries reached, dropping message");
                let _ = Self::append_ack(state, msg.seq);
                continue;
            }
            msg.deliveries += 1;
            msg.ready_at = None;
            out.push(Delivery {
                seq: msg.seq,
                subject: msg.subject.clone(),
                payload: msg.payload.clone(),
                deliveries: msg.deliveries,
            });
            state.pending.insert(
                msg.seq,
                InFlight {
                    msg,
                    delivered_at: now,
                },
            );
        }
        for msg in deferred {
            state.ready.push_back(msg);
        }
        out
    }

    /// Messages currently waiting for delivery (tests and introspection).
    pub fn ready_len(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Messages delivered but not yet settled.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

#[async_trait]
impl Broker for FileBroker {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let published_at = chrono::Utc::now().timestamp();

        let record = JournalRecord::Publish {
            seq,
            subject: subject.to_string(),
            payload: hex::encode(payload),
            published_at,
        };
        writeln!(state.journal, "{}", serde_json::to_string(&record)?)?;
        state.journal.sync_data()?;

        state.ready.push_back(StoredMsg {
            seq,
            subject: subject.to_string(),
            payload: payload.to_vec(),
            published_at,
            deliveries: 0,
            ready_at: None,
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }

    async fn fetch(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BrokerError> {
        let deadline = Instant::now() + wait;

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Ok(Vec::new());
            }

            {
                let mut state = self.state.lock();
                let out = self.take_ready(&mut state, max);
                if !out.is_empty() {
                    return Ok(out);
                }
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return Ok(Vec::new());
            };
            let nap = remaining.min(FETCH_POLL);
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.pending.remove(&delivery.seq).is_none() {
            debug!(seq = delivery.seq, "ack for message no longer pending");
        }
        Self::append_ack(&mut state, delivery.seq)
    }

    async fn nak(&self, delivery: &Delivery, delay: Duration) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if let Some(mut inflight) = state.pending.remove(&delivery.seq) {
            inflight.msg.ready_at = if delay.is_zero() {
                None
            } else {
                Some(Instant::now() + delay)
            };
            state.ready.push_back(inflight.msg);
            drop(state);
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let state = self.state.lock();
        let _ = state.journal.sync_all();
        drop(state);
        self.notify.notify_waiters();
    }
}
