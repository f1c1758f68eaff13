//! Job lifecycle engine
//!
//! Job model, canonical store, event fan-out, queue manager, and the
//! scrape processor that drives browser engines.

pub mod events;
pub mod job;
pub mod manager;
pub mod processor;
pub mod store;

pub use events::{Event, EventHub, Subscription};
pub use job::{
    CookieParam, Job, JobRequest, JobStatus, JobType, NotifyConfig, ProgressInfo, RetryConfig,
};
pub use manager::QueueManager;
pub use processor::{JobProcessor, ProgressFn, ProgressReporter, ProgressUpdate, ScrapeProcessor};
pub use store::JobStore;
