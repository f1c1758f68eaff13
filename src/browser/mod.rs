//! Browser engine port
//!
//! The automation surface the scrape processor drives. Two engine slots
//! exist: the lightweight engine (plain HTTP fetching, shipped here as
//! [`HttpFetchClient`]) and the full CDP engine, which is an external
//! collaborator plugged in behind the same trait.

pub mod http_client;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::job::CookieParam;

pub use http_client::HttpFetchClient;

/// Errors raised by browser engines.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("browser connection error: {0}")]
    Connection(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),
}

impl From<reqwest::Error> for BrowserError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Navigation(err.to_string())
        }
    }
}

/// Options for a single page operation.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub timeout: Duration,
    pub wait_for_load: bool,
    pub screenshot: bool,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, String>,
    pub cookies: Vec<CookieParam>,
    pub proxy: Option<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            wait_for_load: true,
            screenshot: false,
            user_agent: None,
            headers: HashMap::new(),
            cookies: Vec::new(),
            proxy: None,
        }
    }
}

/// Result of a page operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResult {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
}

/// Capability set every browser engine provides.
#[async_trait]
pub trait BrowserClient: Send + Sync {
    /// Whether the engine is up and reachable.
    fn is_running(&self) -> bool;

    /// Engine endpoint for status reporting.
    fn endpoint(&self) -> String;

    /// Navigate to a URL and return its content.
    async fn fetch_page(&self, url: &str, opts: &PageOptions) -> Result<PageResult, BrowserError>;

    /// Evaluate JavaScript on a page and return the resulting value.
    async fn evaluate_script(
        &self,
        url: &str,
        script: &str,
        opts: &PageOptions,
    ) -> Result<serde_json::Value, BrowserError>;

    /// Capture a screenshot of a page.
    async fn take_screenshot(
        &self,
        url: &str,
        full_page: bool,
        opts: &PageOptions,
    ) -> Result<Vec<u8>, BrowserError>;

    /// Click an element matching a CSS selector.
    async fn click_element(
        &self,
        url: &str,
        selector: &str,
        opts: &PageOptions,
    ) -> Result<(), BrowserError>;

    /// Fill form inputs (selector -> value).
    async fn fill_form(
        &self,
        url: &str,
        inputs: &HashMap<String, String>,
        opts: &PageOptions,
    ) -> Result<(), BrowserError>;

    /// Fetch lightweight page metadata (no body payloads).
    async fn get_page_info(&self, url: &str, opts: &PageOptions)
        -> Result<PageResult, BrowserError>;
}
