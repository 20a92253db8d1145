use std::collections::HashMap;
use std::time::Duration;

use crate::model::Labels;

/// One endpoint to scrape, with its final URL and merged label set.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub url: String,
    pub labels: Labels,
}

impl Target {
    pub fn new(url: impl Into<String>, labels: Labels) -> Self {
        Target {
            url: url.into(),
            labels,
        }
    }
}

/// A job with every default already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedJob {
    pub job_name: String,
    pub scrape_interval: Duration,
    pub scrape_timeout: Duration,
    pub static_targets: Vec<Target>,
}

/// Job name to resolved job, as produced by `AppConfig::process`.
pub type TargetTable = HashMap<String, NormalizedJob>;
