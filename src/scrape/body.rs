use std::sync::Arc;

use bytes::Bytes;

use crate::model::Labels;

/// Raw payload of one successful scrape, on its way to the decoder.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub job_name: Arc<str>,
    pub target_url: Arc<str>,
    pub data: Bytes,
    pub labels: Arc<Labels>,
    /// Wall-clock time of the scrape, Unix milliseconds
    pub scraped_at: i64,
}

impl ScrapeResult {
    pub fn new(
        job_name: Arc<str>,
        target_url: Arc<str>,
        data: Bytes,
        labels: Arc<Labels>,
        scraped_at: i64,
    ) -> Self {
        ScrapeResult {
            job_name,
            target_url,
            data,
            labels,
            scraped_at,
        }
    }
}
