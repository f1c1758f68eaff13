//! Lightweight HTTP fetch engine
//!
//! The default engine slot: fetches pages over plain HTTP and extracts
//! title, text, and links from the HTML. Operations that need a real
//! browser (scripts, screenshots, interaction) report `Unsupported` so
//! callers fall back to the full CDP engine.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::{BrowserClient, BrowserError, PageOptions, PageResult};

/// Default user agent for page fetches.
const DEFAULT_USER_AGENT: &str = "scrq/0.1 (+https://github.com/scrq/scrq)";

/// Maximum response body size (10 MB).
const MAX_CONTENT_SIZE: usize = 10 * 1024 * 1024;

/// reqwest-backed lightweight browser engine.
pub struct HttpFetchClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpFetchClient {
    /// Build the engine. `endpoint` is reported by the status API.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, BrowserError> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BrowserError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn fetch_html(&self, url: &str, opts: &PageOptions) -> Result<String, BrowserError> {
        let mut request = self.client.get(url).timeout(opts.timeout);

        if let Some(user_agent) = &opts.user_agent {
            if !user_agent.is_empty() {
                request = request.header(reqwest::header::USER_AGENT, user_agent);
            }
        }
        for (name, value) in &opts.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !opts.cookies.is_empty() {
            let cookie_header = opts
                .cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header(reqwest::header::COOKIE, cookie_header);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BrowserError::Navigation(format!(
                "{url} returned status {status}"
            )));
        }

        let body = response.text().await?;
        if body.len() > MAX_CONTENT_SIZE {
            return Err(BrowserError::Navigation(format!(
                "{url} response too large: {} bytes",
                body.len()
            )));
        }
        Ok(body)
    }

    fn extract_title(document: &Html) -> String {
        let Ok(selector) = Selector::parse("title") else {
            return String::new();
        };
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    fn extract_text(document: &Html) -> String {
        let Ok(selector) = Selector::parse("body") else {
            return String::new();
        };
        let raw = document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        raw.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn extract_links(document: &Html, base: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse("a[href]") else {
            return Vec::new();
        };
        let base_url = Url::parse(base).ok();
        let mut links = Vec::new();
        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let resolved = match (&base_url, Url::parse(href)) {
                (_, Ok(absolute)) => Some(absolute),
                (Some(base), Err(_)) => base.join(href).ok(),
                (None, Err(_)) => None,
            };
            if let Some(url) = resolved {
                if matches!(url.scheme(), "http" | "https") {
                    links.push(url.to_string());
                }
            }
        }
        links
    }
}

#[async_trait]
impl BrowserClient for HttpFetchClient {
    fn is_running(&self) -> bool {
        true
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn fetch_page(&self, url: &str, opts: &PageOptions) -> Result<PageResult, BrowserError> {
        let html = self.fetch_html(url, opts).await?;

        let (title, text, links) = {
            let document = Html::parse_document(&html);
            (
                Self::extract_title(&document),
                Self::extract_text(&document),
                Self::extract_links(&document, url),
            )
        };

        Ok(PageResult {
            url: url.to_string(),
            title,
            html: Some(html),
            text: Some(text),
            links: Some(links),
            screenshot: None,
        })
    }

    async fn evaluate_script(
        &self,
        _url: &str,
        _script: &str,
        _opts: &PageOptions,
    ) -> Result<serde_json::Value, BrowserError> {
        Err(BrowserError::Unsupported("script evaluation"))
    }

    async fn take_screenshot(
        &self,
        _url: &str,
        _full_page: bool,
        _opts: &PageOptions,
    ) -> Result<Vec<u8>, BrowserError> {
        Err(BrowserError::Unsupported("screenshots"))
    }

    async fn click_element(
        &self,
        _url: &str,
        _selector: &str,
        _opts: &PageOptions,
    ) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("element interaction"))
    }

    async fn fill_form(
        &self,
        _url: &str,
        _inputs: &HashMap<String, String>,
        _opts: &PageOptions,
    ) -> Result<(), BrowserError> {
        Err(BrowserError::Unsupported("form filling"))
    }

    async fn get_page_info(
        &self,
        url: &str,
        opts: &PageOptions,
    ) -> Result<PageResult, BrowserError> {
        let html = self.fetch_html(url, opts).await?;
        let (title, links) = {
            let document = Html::parse_document(&html);
            (
                Self::extract_title(&document),
                Self::extract_links(&document, url),
            )
        };

        Ok(PageResult {
            url: url.to_string(),
            title,
            html: None,
            text: None,
            links: Some(links),
            screenshot: None,
        })
    }
}
