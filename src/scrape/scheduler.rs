use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::body::ScrapeResult;
use super::decoder::Decoder;
use super::fetcher::Fetcher;
use super::pipeline::IngestionPipeline;
use super::target::{Target, TargetTable};
use crate::model::Labels;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Stopped,
}

/// Runs one scrape loop per (job, target) and feeds the ingestion pipeline.
///
/// All workers and the pipeline share one cancellation token. `stop` cancels
/// it, waits for every worker to return and only then stops the pipeline, so
/// no worker can submit into a pipeline that has stopped consuming.
pub struct Scheduler {
    targets: TargetTable,
    fetcher: Arc<dyn Fetcher>,
    pipeline: Arc<IngestionPipeline>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    state: State,
}

impl Scheduler {
    pub fn new(
        targets: TargetTable,
        storage: Arc<dyn Storage>,
        decoder: Arc<dyn Decoder>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pipeline = Arc::new(IngestionPipeline::new(storage, decoder, cancel.clone()));
        Scheduler {
            targets,
            fetcher,
            pipeline,
            cancel,
            handles: Vec::new(),
            state: State::Created,
        }
    }

    /// Starts the pipeline consumer and spawns every scrape worker.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            State::Created => {}
            State::Running => bail!("scheduler already started"),
            State::Stopped => bail!("scheduler has been stopped"),
        }
        if let Some(job) = self.targets.values().find(|job| job.scrape_interval.is_zero()) {
            bail!("job {}: scrape interval must be greater than zero", job.job_name);
        }

        self.pipeline.start();
        for job in self.targets.values() {
            let job_name: Arc<str> = Arc::from(job.job_name.as_str());
            for target in &job.static_targets {
                let worker = Worker::new(
                    Arc::clone(&job_name),
                    target,
                    job.scrape_interval,
                    job.scrape_timeout,
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.pipeline),
                    self.cancel.clone(),
                );
                self.handles.push(tokio::spawn(worker.run()));
            }
            info!(
                "Job {}: {} targets every {:?} (timeout {:?})",
                job.job_name,
                job.static_targets.len(),
                job.scrape_interval,
                job.scrape_timeout
            );
        }
        self.state = State::Running;
        info!("Scheduler started {} scrape workers", self.handles.len());
        Ok(())
    }

    /// Cancels all workers, waits for them, then drains the pipeline.
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        self.state = State::Stopped;
        self.cancel.cancel();

        let handles = std::mem::take(&mut self.handles);
        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Scrape worker ended abnormally: {}", e);
            }
        }
        debug!("{} scrape workers joined", count);

        self.pipeline.stop().await;
        info!("Scheduler stopped");
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }
}

// Workers cannot be joined here; cancelling lets them and the consumer wind down.
impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Scrape loop for a single target: wait for the tick, fetch, submit.
struct Worker {
    job_name: Arc<str>,
    url: Arc<str>,
    labels: Arc<Labels>,
    interval: Duration,
    timeout: Duration,
    fetcher: Arc<dyn Fetcher>,
    pipeline: Arc<IngestionPipeline>,
    cancel: CancellationToken,
}

impl Worker {
    fn new(
        job_name: Arc<str>,
        target: &Target,
        interval: Duration,
        timeout: Duration,
        fetcher: Arc<dyn Fetcher>,
        pipeline: Arc<IngestionPipeline>,
        cancel: CancellationToken,
    ) -> Self {
        Worker {
            job_name,
            url: Arc::from(target.url.as_str()),
            labels: Arc::new(target.labels.clone()),
            interval,
            timeout,
            fetcher,
            pipeline,
            cancel,
        }
    }

    async fn run(self) {
        // First scrape one full interval after start; late ticks are skipped, not replayed.
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                fetched = time::timeout(self.timeout, self.fetcher.fetch(&self.url)) => fetched,
            };
            let data = match fetched {
                Ok(Ok(data)) => data,
                Ok(Err(e)) => {
                    debug!("Scrape of {} failed: {}", self.url, e);
                    continue;
                }
                Err(_) => {
                    debug!("Scrape of {} timed out after {:?}", self.url, self.timeout);
                    continue;
                }
            };

            let result = ScrapeResult::new(
                Arc::clone(&self.job_name),
                Arc::clone(&self.url),
                data,
                Arc::clone(&self.labels),
                Utc::now().timestamp_millis(),
            );
            if self.pipeline.submit(result).await.is_err() {
                break;
            }
        }
        debug!("Scrape worker for {} exited", self.url);
    }
}
