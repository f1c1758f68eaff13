//! Sliding-window rate limiter with burst cap
//!
//! Accounting is per client identifier: a window of request timestamps is
//! kept, timestamps older than the window are dropped on every check, and
//! a request is admitted only when both the window count and the
//! trailing-one-second burst count are under their limits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Interval between stale-window sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed per window.
    pub requests_per_window: usize,
    /// Duration of the sliding window.
    pub window: Duration,
    /// Maximum requests allowed within any single second.
    pub burst_max: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 100,
            window: Duration::from_secs(60),
            burst_max: 20,
        }
    }
}

/// Rate limit details exposed through response headers.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub limit: usize,
    pub remaining: usize,
    /// Time until the oldest in-window request expires; zero when the
    /// window is empty.
    pub reset_after: Duration,
}

struct Window {
    requests: Vec<Instant>,
    last_seen: Instant,
}

/// Sliding-window limiter keyed by client identifier.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    limit: usize,
    window: Duration,
    burst_max: usize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            limit: config.requests_per_window,
            window: config.window,
            burst_max: config.burst_max,
        }
    }

    /// Check whether a request from this client is allowed, recording it
    /// when it is.
    pub fn allow(&self, client_id: &str) -> bool {
        let now = Instant::now();

        let mut entry = self.windows.entry(client_id.to_string()).or_insert_with(|| Window {
            requests: Vec::with_capacity(self.limit),
            last_seen: now,
        });
        entry.last_seen = now;

        // Drop timestamps that fell out of the window.
        let window = self.window;
        entry
            .requests
            .retain(|t| now.duration_since(*t) < window);

        if entry.requests.len() >= self.limit {
            return false;
        }

        let burst_count = entry
            .requests
            .iter()
            .filter(|t| now.duration_since(**t) < Duration::from_secs(1))
            .count();
        if burst_count >= self.burst_max {
            return false;
        }

        entry.requests.push(now);
        true
    }

    /// Current limit/remaining/reset for a client, for response headers.
    pub fn info(&self, client_id: &str) -> RateLimitInfo {
        let now = Instant::now();
        let (remaining, reset_after) = match self.windows.get(client_id) {
            Some(entry) => {
                let count = entry
                    .requests
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .count();
                let reset_after = entry
                    .requests
                    .iter()
                    .filter(|t| now.duration_since(**t) < self.window)
                    .min()
                    .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                    .unwrap_or(Duration::ZERO);
                (self.limit.saturating_sub(count), reset_after)
            }
            None => (self.limit, Duration::ZERO),
        };

        RateLimitInfo {
            limit: self.limit,
            remaining,
            reset_after,
        }
    }

    /// Forget a client's window entirely.
    pub fn reset(&self, client_id: &str) {
        self.windows.remove(client_id);
    }

    /// Drop windows that are empty and have been idle for 2x the window
    /// duration. Returns the number removed.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = self.window * 2;
        let before = self.windows.len();
        let window = self.window;
        self.windows.retain(|_, w| {
            w.requests.retain(|t| t.elapsed() < window);
            !(w.requests.is_empty() && w.last_seen.elapsed() > cutoff)
        });
        before - self.windows.len()
    }

    /// Spawn the periodic stale-window sweep task.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let limiter = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = limiter.sweep_idle();
                        debug!(removed, "rate limiter sweep");
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

    fn limiter(limit: usize, window: Duration, burst: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window,
            burst_max: burst,
        })
    }

    #[test]
    fn allows_up_to_window_limit() {
        let rl = limiter(5, Duration::from_secs(60), 5);
        for _ in 0..5 {
            assert!(rl.allow("client"));
        }
        assert!(!rl.allow("client"));
    }

    #[test]
    fn burst_cap_denies_within_one_second() {
        let rl = limiter(100, Duration::from_secs(60), 3);
        for _ in 0..3 {
            assert!(rl.allow("client"));
        }
        // Window has room but the 1-second burst cap is hit.
        assert!(!rl.allow("client"));
    }

    #[test]
    fn clients_are_independent() {
        let rl = limiter(2, Duration::from_secs(60), 2);
        assert!(rl.allow("a"));
        assert!(rl.allow("a"));
        assert!(!rl.allow("a"));
        assert!(rl.allow("b"));
    }

    #[test]
    fn window_slides() {
        let rl = limiter(2, Duration::from_millis(50), 2);
        assert!(rl.allow("client"));
        assert!(rl.allow("client"));
        assert!(!rl.allow("client"));

        std::thread::sleep(Duration::from_millis(60));
        assert!(rl.allow("client"));
    }

    #[test]
    fn info_reports_remaining_and_reset() {
        let rl = limiter(10, Duration::from_secs(60), 10);

        let fresh = rl.info("client");
        assert_eq!(fresh.limit, 10);
        assert_eq!(fresh.remaining, 10);
        assert_eq!(fresh.reset_after, Duration::ZERO);

        assert!(rl.allow("client"));
        assert!(rl.allow("client"));
        let info = rl.info("client");
        assert_eq!(info.remaining, 8);
        assert!(info.reset_after > Duration::ZERO);
        assert!(info.reset_after <= Duration::from_secs(60));
    }

    #[test]
    fn reset_clears_a_client() {
        let rl = limiter(1, Duration::from_secs(60), 1);
        assert!(rl.allow("client"));
        assert!(!rl.allow("client"));

        rl.reset("client");
        assert!(rl.allow("client"));
    }

    #[test]
    fn sweep_drops_idle_empty_windows() {
        let rl = limiter(5, Duration::from_millis(10), 5);
        assert!(rl.allow("client"));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(rl.sweep_idle(), 1);
        assert_eq!(rl.windows.len(), 0);
    }
}
