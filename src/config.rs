//! Configuration for the Scrq server
//!
//! All settings arrive via CLI flags; defaults mirror a single-node
//! deployment with the embedded queue enabled.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used in banners and the HTTP server.
pub const APP_NAME: &str = "Scrq Server";

/// Main configuration for the Scrq server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host address to bind the HTTP server.
    pub host: String,
    /// Port number for the HTTP server.
    pub port: u16,
    /// Base URL used when building absolute URLs in API responses.
    /// Auto-derived from host/port when empty.
    pub base_url: String,

    /// Browser CDP host for the full engine.
    pub browser_host: String,
    /// Browser CDP port for the full engine.
    pub browser_port: u16,

    /// Enable the Chrome-backed engine.
    pub with_chrome: bool,
    /// Chromium revision to use (0 = default).
    pub chrome_revision: u32,

    /// Enable the durable job queue and the job API routes.
    pub with_nats: bool,
    /// URL of an externally supervised queue server, recorded for the
    /// external-broker deployment shape.
    pub nats_url: String,
    /// Storage directory for the embedded file-backed queue.
    pub nats_store: PathBuf,
    /// Auto-download the external queue binary (external supervision is
    /// handled outside this process).
    pub nats_autodl: bool,
    /// Path to the external queue binary.
    pub nats_bin: PathBuf,

    /// Peer IPs allowed to call the `/scrq/*` routes; empty allows all.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    /// Rate limit: requests allowed per window.
    pub rate_limit_requests: usize,
    /// Rate limit window duration.
    #[serde(with = "duration_secs")]
    pub rate_limit_window: Duration,
    /// Burst cap: requests allowed within any single second.
    pub rate_limit_burst: usize,
    /// TTL for idempotency cache entries.
    #[serde(with = "duration_secs")]
    pub idempotency_ttl: Duration,
    /// Default TTL for job results.
    #[serde(with = "duration_secs")]
    pub result_ttl: Duration,
    /// Maximum allowed per-attempt job timeout.
    #[serde(with = "duration_secs")]
    pub max_job_timeout: Duration,
    /// Maximum retries per job.
    pub max_retries: u32,
}

mod duration_secs {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            base_url: String::new(),
            browser_host: "127.0.0.1".to_string(),
            browser_port: 9222,
            with_chrome: false,
            chrome_revision: 0,
            with_nats: true,
            nats_url: "nats://127.0.0.1:4222".to_string(),
            nats_store: PathBuf::from("./data/nats"),
            nats_autodl: true,
            nats_bin: PathBuf::from("./bin/nats-server"),
            allowed_ips: Vec::new(),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_burst: 20,
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            result_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_job_timeout: Duration::from_secs(300),
            max_retries: 5,
        }
    }
}

impl Config {
    /// Resolve derived fields and clamp out-of-range values.
    pub fn finalize(&mut self) {
        if self.base_url.is_empty() {
            let host = if self.host == "0.0.0.0" {
                "localhost"
            } else {
                self.host.as_str()
            };
            self.base_url = format!("http://{}:{}", host, self.port);
        }

        self.max_retries = self.max_retries.clamp(1, 10);
        if self.rate_limit_requests < 1 {
            self.rate_limit_requests = 100;
        }
        self.allowed_ips.retain(|ip| !ip.is_empty());
    }

    /// Validate all configuration fields.
    ///
    /// Collects every validation error so the user can fix everything in
    /// one pass rather than playing whack-a-mole.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        if self.browser_port == 0 {
            errors.push("browser-port must be between 1 and 65535".to_string());
        }
        if self.host.is_empty() {
            errors.push("host must not be empty".to_string());
        }
        if self.with_nats && self.nats_store.as_os_str().is_empty() {
            errors.push("nats-store must not be empty".to_string());
        }
        if self.rate_limit_window.is_zero() {
            errors.push("rate limit window must be positive".to_string());
        }
        if self.max_job_timeout.is_zero() {
            errors.push("max job timeout must be positive".to_string());
        }
        if self.result_ttl.is_zero() {
            errors.push("result TTL must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }

    /// Address string the HTTP server binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn default_config_passes_validation() {
        let cfg = valid_config();
        assert!(cfg.validate().is_ok(), "default config should be valid");
    }

    #[test]
    fn default_config_values() {
        let cfg = valid_config();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.browser_port, 9222);
        assert!(cfg.with_nats);
        assert!(!cfg.with_chrome);
        assert!(cfg.allowed_ips.is_empty());
        assert_eq!(cfg.rate_limit_requests, 100);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(60));
        assert_eq!(cfg.rate_limit_burst, 20);
        assert_eq!(cfg.idempotency_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.result_ttl, Duration::from_secs(604_800));
        assert_eq!(cfg.max_retries, 5);
    }

    #[test]
    fn finalize_derives_base_url_from_wildcard_host() {
        let mut cfg = valid_config();
        cfg.finalize();
        assert_eq!(cfg.base_url, "http://localhost:8000");
    }

    #[test]
    fn finalize_derives_base_url_from_explicit_host() {
        let mut cfg = valid_config();
        cfg.host = "192.168.1.5".to_string();
        cfg.port = 9000;
        cfg.finalize();
        assert_eq!(cfg.base_url, "http://192.168.1.5:9000");
    }

    #[test]
    fn finalize_keeps_explicit_base_url() {
        let mut cfg = valid_config();
        cfg.base_url = "https://scrape.example.com".to_string();
        cfg.finalize();
        assert_eq!(cfg.base_url, "https://scrape.example.com");
    }

    #[test]
    fn finalize_clamps_max_retries() {
        let mut cfg = valid_config();
        cfg.max_retries = 0;
        cfg.finalize();
        assert_eq!(cfg.max_retries, 1);

        cfg.max_retries = 50;
        cfg.finalize();
        assert_eq!(cfg.max_retries, 10);
    }

    #[test]
    fn finalize_drops_empty_allowlist_entries() {
        let mut cfg = valid_config();
        cfg.allowed_ips = vec!["10.0.0.1".to_string(), String::new()];
        cfg.finalize();
        assert_eq!(cfg.allowed_ips, vec!["10.0.0.1".to_string()]);
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut cfg = valid_config();
        cfg.port = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("port must be between"));
    }

    #[test]
    fn validate_collects_multiple_errors() {
        let mut cfg = valid_config();
        cfg.port = 0;
        cfg.host = String::new();
        let msg = cfg.validate().unwrap_err().to_string();
        assert!(msg.contains("port must be between"));
        assert!(msg.contains("host must not be empty"));
    }

    #[test]
    fn validate_skips_store_check_when_queue_disabled() {
        let mut cfg = valid_config();
        cfg.with_nats = false;
        cfg.nats_store = PathBuf::new();
        assert!(cfg.validate().is_ok());
    }
}
