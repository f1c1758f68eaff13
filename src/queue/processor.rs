//! Scrape job processor
//!
//! Maps a job request onto browser engine calls, reporting staged
//! progress along the way. The dispatch loop owns timeouts and retries;
//! the processor only executes one attempt.

use std::sync::Arc;

use async_trait::async_trait;

use crate::browser::{BrowserClient, BrowserError, PageOptions};
use crate::error::AppError;

use super::job::{Job, ProgressInfo};

/// A single progress report from a running attempt.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
    pub info: Option<ProgressInfo>,
}

/// Sink the dispatch loop hands to the processor; writes flow into the
/// job store and the event hub.
pub type ProgressFn<'a> = &'a (dyn Fn(ProgressUpdate) + Send + Sync);

/// Executes one attempt of a job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(
        &self,
        job: &Job,
        progress: ProgressFn<'_>,
    ) -> Result<serde_json::Value, AppError>;
}

/// Tracks the current stage and page/item position of an attempt and
/// forwards reports through the progress sink.
pub struct ProgressReporter<'a> {
    progress: ProgressFn<'a>,
    info: ProgressInfo,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(progress: ProgressFn<'a>) -> Self {
        Self {
            progress,
            info: ProgressInfo::default(),
        }
    }

    /// Record the current processing stage.
    pub fn set_stage(&mut self, stage: &str) {
        self.info.stage = Some(stage.to_string());
    }

    /// Record page position (page X of Y).
    pub fn set_pages(&mut self, current: u32, total: u32) {
        self.info.current_page = Some(current);
        self.info.total_pages = Some(total);
    }

    /// Record item position (item X of Y).
    pub fn set_items(&mut self, current: u32, total: u32) {
        self.info.current_item = Some(current);
        self.info.total_items = Some(total);
    }

    /// Emit a progress report carrying the current stage breakdown.
    pub fn report(&mut self, percent: u8, message: &str) {
        self.info.message = Some(message.to_string());
        (self.progress)(ProgressUpdate {
            percent,
            message: message.to_string(),
            info: Some(self.info.clone()),
        });
    }
}

fn map_browser_error(err: BrowserError) -> AppError {
    match err {
        BrowserError::Unsupported(op) => {
            AppError::EngineUnavailable(format!("{op} is not supported by this engine"))
        }
        other => AppError::Browser(other.to_string()),
    }
}

/// Processor for `scrape` jobs: selects an engine, fetches the page or
/// evaluates the script, and returns the result value.
pub struct ScrapeProcessor {
    lightpanda: Option<Arc<dyn BrowserClient>>,
    chrome: Option<Arc<dyn BrowserClient>>,
}

impl ScrapeProcessor {
    pub fn new(
        lightpanda: Option<Arc<dyn BrowserClient>>,
        chrome: Option<Arc<dyn BrowserClient>>,
    ) -> Self {
        Self { lightpanda, chrome }
    }

    fn select_engine(&self, job: &Job) -> Result<Arc<dyn BrowserClient>, AppError> {
        let req = &job.request;
        match req.engine.as_str() {
            "chrome" => self
                .chrome
                .clone()
                .ok_or_else(|| AppError::EngineUnavailable("chrome engine not available".into())),
            "lightpanda" | "" => {
                if req.proxy.as_deref().is_some_and(|p| !p.is_empty()) {
                    return Err(AppError::validation(
                        "proxy is only supported with the chrome engine",
                    ));
                }
                self.lightpanda.clone().ok_or_else(|| {
                    AppError::EngineUnavailable("lightpanda engine not available".into())
                })
            }
            other => Err(AppError::validation(format!("unknown engine: {other}"))),
        }
    }

    fn build_page_options(job: &Job) -> PageOptions {
        let req = &job.request;
        let mut opts = PageOptions::default();
        if req.timeout > 0 {
            opts.timeout = std::time::Duration::from_secs(req.timeout);
        }
        opts.wait_for_load = req.wait_for_load;
        opts.user_agent = req.user_agent.clone();
        opts.headers = req.headers.clone();
        opts.cookies = req.cookies.clone();
        opts.proxy = req.proxy.clone();
        opts
    }
}

#[async_trait]
impl JobProcessor for ScrapeProcessor {
    async fn process(
        &self,
        job: &Job,
        progress: ProgressFn<'_>,
    ) -> Result<serde_json::Value, AppError> {
        let req = &job.request;
        let mut reporter = ProgressReporter::new(progress);
        reporter.set_stage("initialization");

        let client = self.select_engine(job)?;

        reporter.report(10, "Initializing browser");
        reporter.set_stage("browser_ready");

        let opts = Self::build_page_options(job);

        reporter.set_stage("fetching");
        reporter.set_pages(1, 1);
        reporter.report(30, "Fetching page");

        let result = match req.script.as_deref().filter(|s| !s.is_empty()) {
            Some(script) => {
                reporter.set_stage("script_execution");
                reporter.report(50, "Executing script");
                client
                    .evaluate_script(&req.url, script, &opts)
                    .await
                    .map_err(map_browser_error)?
            }
            None => {
                let page = client
                    .fetch_page(&req.url, &opts)
                    .await
                    .map_err(map_browser_error)?;
                serde_json::to_value(page)?
            }
        };

        reporter.set_stage("processing");
        reporter.report(90, "Processing result");

        reporter.set_stage("completed");
        reporter.report(100, "Job completed successfully");

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::PageResult;
    use crate::queue::job::JobRequest;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Engine stub that records calls and serves canned pages.
    struct StubEngine {
        fetches: Mutex<Vec<String>>,
        scripts: Mutex<Vec<String>>,
    }

    impl StubEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fetches: Mutex::new(Vec::new()),
                scripts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl BrowserClient for StubEngine {
        fn is_running(&self) -> bool {
            true
        }

        fn endpoint(&self) -> String {
            "stub://engine".to_string()
        }

        async fn fetch_page(
            &self,
            url: &str,
            _opts: &PageOptions,
        ) -> Result<PageResult, BrowserError> {
            self.fetches.lock().push(url.to_string());
            Ok(PageResult {
                url: url.to_string(),
                title: "Example".to_string(),
                ..Default::default()
            })
        }

        async fn evaluate_script(
            &self,
            _url: &str,
            script: &str,
            _opts: &PageOptions,
        ) -> Result<serde_json::Value, BrowserError> {
            self.scripts.lock().push(script.to_string());
            Ok(serde_json::json!({"evaluated": true}))
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
            _opts: &PageOptions,
        ) -> Result<PageResult, BrowserError> {
            Ok(PageResult {
                url: url.to_string(),
                ..Default::default()
            })
        }
    }

    fn job_with(engine: &str, script: Option<&str>) -> Job {
        Job::new(JobRequest {
            url: "https://example.com".to_string(),
            engine: engine.to_string(),
            script: script.map(String::from),
            ..Default::default()
        })
    }

    fn collecting_sink() -> (Arc<Mutex<Vec<ProgressUpdate>>>, impl Fn(ProgressUpdate) + Send + Sync) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink_updates = Arc::clone(&updates);
        (updates, move |u| sink_updates.lock().push(u))
    }

    #[tokio::test]
    async fn fetch_path_returns_page_result() {
        let engine = StubEngine::new();
        let client: Arc<dyn BrowserClient> = engine.clone();
        let processor = ScrapeProcessor::new(Some(client), None);
        let (updates, sink) = collecting_sink();

        let result = processor
            .process(&job_with("", None), &sink)
            .await
            .unwrap();

        assert_eq!(result["title"], "Example");
        assert_eq!(engine.fetches.lock().len(), 1);
        assert!(engine.scripts.lock().is_empty());

        let percents: Vec<u8> = updates.lock().iter().map(|u| u.percent).collect();
        assert_eq!(percents, vec![10, 30, 90, 100]);
    }

    #[tokio::test]
    async fn script_path_evaluates_script() {
        let engine = StubEngine::new();
        let client: Arc<dyn BrowserClient> = engine.clone();
        let processor = ScrapeProcessor::new(Some(client), None);
        let (updates, sink) = collecting_sink();

        let result = processor
            .process(&job_with("lightpanda", Some("document.title")), &sink)
            .await
            .unwrap();

        assert_eq!(result["evaluated"], true);
        assert_eq!(engine.scripts.lock().as_slice(), ["document.title"]);

        let stages: Vec<String> = updates
            .lock()
            .iter()
            .filter_map(|u| u.info.as_ref()?.stage.clone())
            .collect();
        assert!(stages.contains(&"script_execution".to_string()));
        assert_eq!(stages.last().unwrap(), "completed");
    }

    #[tokio::test]
    async fn progress_is_monotonic_within_attempt() {
        let engine: Arc<dyn BrowserClient> = StubEngine::new();
        let processor = ScrapeProcessor::new(Some(engine), None);
        let (updates, sink) = collecting_sink();

        processor
            .process(&job_with("", Some("1+1")), &sink)
            .await
            .unwrap();

        let percents: Vec<u8> = updates.lock().iter().map(|u| u.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    }

    #[tokio::test]
    async fn unknown_engine_is_rejected() {
        let processor = ScrapeProcessor::new(Some(StubEngine::new() as Arc<dyn BrowserClient>), None);
        let (_, sink) = collecting_sink();

        let err = processor
            .process(&job_with("firefox", None), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("unknown engine"));
    }

    #[tokio::test]
    async fn missing_chrome_engine_is_unavailable() {
        let processor = ScrapeProcessor::new(Some(StubEngine::new() as Arc<dyn BrowserClient>), None);
        let (_, sink) = collecting_sink();

        let err = processor
            .process(&job_with("chrome", None), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EngineUnavailable(_)));
    }

    #[tokio::test]
    async fn proxy_requires_chrome() {
        let processor = ScrapeProcessor::new(Some(StubEngine::new() as Arc<dyn BrowserClient>), None);
        let (_, sink) = collecting_sink();

        let mut job = job_with("lightpanda", None);
        job.request.proxy = Some("http://proxy.example:8080".to_string());

        let err = processor.process(&job, &sink).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("proxy"));
    }
}
