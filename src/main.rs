//! Scrq server: scrape + queue
//!
//! Wires the job lifecycle engine to the HTTP surface: stores before the
//! manager, the manager before the handlers, teardown in reverse.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use scrq::broker::{Broker, BrokerConfig, FileBroker};
use scrq::browser::{BrowserClient, HttpFetchClient};
use scrq::config::{Config, APP_NAME};
use scrq::http::{AppState, HttpServer};
use scrq::queue::{EventHub, JobStore, QueueManager, ScrapeProcessor};
use scrq::security::{IdempotencyCache, RateLimitConfig, RateLimiter};

#[derive(Parser)]
#[command(name = "scrq")]
#[command(about = "Scrq server (scrape + queue)")]
#[command(version)]
struct Cli {
    /// Host address to bind the server
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number for the server
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Base URL for API responses (auto-generated if empty)
    #[arg(long, default_value = "")]
    base_url: String,

    /// Lightpanda browser CDP host
    #[arg(long, default_value = "127.0.0.1")]
    browser_host: String,

    /// Lightpanda browser CDP port
    #[arg(long, default_value_t = 9222)]
    browser_port: u16,

    /// Enable Chrome-backed endpoints
    #[arg(long)]
    with_chrome: bool,

    /// Chromium revision to use (0 uses default)
    #[arg(long, default_value_t = 0)]
    chrome_revision: u32,

    /// Enable the durable job queue
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    with_nats: bool,

    /// Queue server URL (external-broker deployments)
    #[arg(long, default_value = "nats://127.0.0.1:4222")]
    nats_url: String,

    /// Queue storage directory
    #[arg(long, default_value = "./data/nats")]
    nats_store: std::path::PathBuf,

    /// Auto-download the queue server binary
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    nats_autodl: bool,

    /// Path to the queue server binary
    #[arg(long, default_value = "./bin/nats-server")]
    nats_bin: std::path::PathBuf,

    /// Restrict /scrq/* routes to these peer IPs (comma-separated; empty allows all)
    #[arg(long, value_delimiter = ',')]
    allowed_ips: Vec<String>,

    /// Rate limit requests per minute
    #[arg(long, default_value_t = 100)]
    rate_limit: usize,

    /// Maximum retries per job (1-10)
    #[arg(long, default_value_t = 5)]
    max_retries: u32,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config {
            host: self.host,
            port: self.port,
            base_url: self.base_url,
            browser_host: self.browser_host,
            browser_port: self.browser_port,
            with_chrome: self.with_chrome,
            chrome_revision: self.chrome_revision,
            with_nats: self.with_nats,
            nats_url: self.nats_url,
            nats_store: self.nats_store,
            nats_autodl: self.nats_autodl,
            nats_bin: self.nats_bin,
            allowed_ips: self.allowed_ips,
            rate_limit_requests: self.rate_limit,
            max_retries: self.max_retries,
            ..Config::default()
        };
        config.finalize();
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    config.validate()?;

    info!("Starting {} v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let (shutdown_tx, _) = broadcast::channel(16);

    // Stores first; construction order is fixed and teardown is reverse.
    let store = Arc::new(JobStore::new());
    let events = EventHub::new();
    let idempotency = Arc::new(IdempotencyCache::new(config.idempotency_ttl));
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        requests_per_window: config.rate_limit_requests,
        window: config.rate_limit_window,
        burst_max: config.rate_limit_burst,
    }));

    let store_sweeper = store.clone().spawn_sweeper(shutdown_tx.subscribe());
    let idempotency_sweeper = idempotency.clone().spawn_sweeper(shutdown_tx.subscribe());
    let limiter_sweeper = limiter.clone().spawn_sweeper(shutdown_tx.subscribe());

    // Engines: the lightweight fetch engine is always available; the full
    // CDP engine is attached externally.
    let cdp_endpoint = format!("ws://{}:{}", config.browser_host, config.browser_port);
    let lightpanda: Arc<dyn BrowserClient> = Arc::new(
        HttpFetchClient::new(cdp_endpoint.clone())
            .map_err(|err| anyhow::anyhow!("failed to initialize fetch engine: {err}"))?,
    );
    if config.with_chrome {
        warn!(
            revision = config.chrome_revision,
            "chrome engine requested; attach an external Chrome at the CDP endpoint"
        );
    }

    // Queue subsystem.
    let mut broker: Option<Arc<dyn Broker>> = None;
    let mut manager: Option<Arc<QueueManager>> = None;
    let mut worker = None;
    if config.with_nats {
        info!(store_dir = %config.nats_store.display(), "setting up durable job queue");
        let file_broker: Arc<dyn Broker> = Arc::new(
            FileBroker::open(BrokerConfig {
                store_dir: config.nats_store.clone(),
                ..Default::default()
            })
            .context("Failed to open job queue")?,
        );

        let queue_manager = Arc::new(QueueManager::new(
            Arc::clone(&file_broker),
            Arc::clone(&store),
            events.clone(),
        ));

        let processor = Arc::new(ScrapeProcessor::new(Some(Arc::clone(&lightpanda)), None));
        worker = Some(queue_manager.clone().start(processor, shutdown_tx.subscribe()));

        broker = Some(file_broker);
        manager = Some(queue_manager);
    } else {
        warn!("job queue disabled; job routes will not be mounted");
    }

    let allowed_ips: HashSet<String> = config.allowed_ips.iter().cloned().collect();
    if !allowed_ips.is_empty() {
        info!(peers = allowed_ips.len(), "IP allow-list enabled");
    }

    let state = AppState {
        manager,
        idempotency,
        limiter,
        browser: Some(lightpanda),
        base_url: config.base_url.clone(),
        allowed_ips: Arc::new(allowed_ips),
    };

    let server = HttpServer::new(config.listen_addr(), state);
    let server_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server.run(server_shutdown).await {
            error!(error = %err, "HTTP server failed");
        }
    });

    info!("Server listening on {}", config.listen_addr());
    info!("Browser CDP endpoint: {}", cdp_endpoint);
    if config.with_nats {
        info!("Durable queue enabled (external url {})", config.nats_url);
    }

    // Wait for Ctrl+C or SIGTERM.
    tokio::select! {
        _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
        _ = wait_for_sigterm() => info!("Received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(());

    // Teardown in reverse order of construction.
    if tokio::time::timeout(Duration::from_secs(5), server_handle)
        .await
        .is_err()
    {
        warn!("HTTP server did not shut down within 5s");
    }
    if let Some(worker) = worker {
        if tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .is_err()
        {
            warn!("queue worker did not shut down within 5s");
        }
    }
    events.close_all();
    if let Some(broker) = broker {
        broker.close().await;
    }
    let _ = tokio::join!(store_sweeper, idempotency_sweeper, limiter_sweeper);

    info!("Shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await
}
