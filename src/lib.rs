use std::time::Duration;

pub mod config;
pub mod logging;
pub mod model;
pub mod scrape;
pub mod storage;

pub use config::AppConfig;
pub use model::{Label, Labels, Metric, Sample, Series};
pub use scrape::{Decoder, Fetcher, HttpFetcher, IngestionPipeline, Scheduler, TextDecoder};
pub use storage::{MemoryStorage, Storage, StorageError};

pub struct Settings {}

impl Settings {
    // Instant queries look this far back (ms) for the most recent sample.
    pub const LOOKBACK_DELTA_MS: i64 = 5 * 60 * 1000;
    // Pending scrape results the ingestion queue holds before submitters block.
    pub const PIPELINE_CAPACITY: usize = 10_000;
    pub const DEFAULT_METRICS_PATH: &'static str = "/metrics";
    pub const DEFAULT_SCRAPE_INTERVAL: Duration = Duration::from_secs(15);
    pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const STATS_INTERVAL: Duration = Duration::from_secs(60);
    pub const JOB_LABEL: &'static str = "job";
}
