use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::body::ScrapeResult;
use super::decoder::Decoder;
use crate::storage::Storage;
use crate::Settings;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline cancelled")]
    Cancelled,
}

/// Bounded queue between scrape workers and the store.
///
/// Producers call [`IngestionPipeline::submit`]; a single consumer task
/// decodes each payload and appends the samples. When the queue is full,
/// submitters wait, which throttles every scrape worker alike.
pub struct IngestionPipeline {
    sender: Sender<ScrapeResult>,
    receiver: Mutex<Option<Receiver<ScrapeResult>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    storage: Arc<dyn Storage>,
    decoder: Arc<dyn Decoder>,
    cancel: CancellationToken,
}

impl IngestionPipeline {
    pub fn new(storage: Arc<dyn Storage>, decoder: Arc<dyn Decoder>, cancel: CancellationToken) -> Self {
        Self::with_capacity(storage, decoder, cancel, Settings::PIPELINE_CAPACITY)
    }

    pub fn with_capacity(
        storage: Arc<dyn Storage>,
        decoder: Arc<dyn Decoder>,
        cancel: CancellationToken,
        capacity: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        IngestionPipeline {
            sender,
            receiver: Mutex::new(Some(receiver)),
            consumer: Mutex::new(None),
            storage,
            decoder,
            cancel,
        }
    }

    /// Spawns the consumer task. Calling it again is a no-op.
    pub fn start(&self) {
        let receiver = match self.receiver.lock().take() {
            Some(rx) => rx,
            None => return,
        };
        let consumer = Consumer {
            receiver,
            storage: Arc::clone(&self.storage),
            decoder: Arc::clone(&self.decoder),
            cancel: self.cancel.clone(),
        };
        *self.consumer.lock() = Some(tokio::spawn(consumer.run()));
    }

    /// Queues a scrape result, waiting for room if the queue is full.
    ///
    /// Returns `Cancelled` without queueing once shutdown has been signalled,
    /// including while waiting for room.
    pub async fn submit(&self, result: ScrapeResult) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            sent = self.sender.send(result) => sent.map_err(|_| PipelineError::Cancelled),
        }
    }

    /// Signals cancellation and waits for the consumer to drain and exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.consumer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Ingestion consumer ended abnormally: {}", e);
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Free slots in the queue.
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}

struct Consumer {
    receiver: Receiver<ScrapeResult>,
    storage: Arc<dyn Storage>,
    decoder: Arc<dyn Decoder>,
    cancel: CancellationToken,
}

impl Consumer {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.receiver.recv() => match result {
                    Some(result) => self.ingest(result),
                    None => break,
                },
            }
        }

        // Nothing new can arrive once the queue is closed; ingest what is left.
        self.receiver.close();
        let mut drained = 0usize;
        while let Ok(result) = self.receiver.try_recv() {
            self.ingest(result);
            drained += 1;
        }
        info!("Ingestion consumer stopped ({} queued results drained)", drained);
    }

    fn ingest(&self, result: ScrapeResult) {
        let decoded = match self.decoder.decode(&result.data, result.scraped_at) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    "Dropping payload from {} (job {}): {}",
                    result.target_url, result.job_name, e
                );
                return;
            }
        };

        let job_label = !result.labels.contains(Settings::JOB_LABEL);
        let count = decoded.len();
        for (metric, sample) in decoded {
            let mut metric = metric.with_labels(&result.labels);
            if job_label {
                metric = metric.with_label(Settings::JOB_LABEL, &*result.job_name);
            }
            if let Err(e) = self.storage.append(&metric, sample) {
                warn!("Failed to store sample for {}: {}", metric, e);
            }
        }
        debug!("Ingested {} samples from {}", count, result.target_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, Metric, Sample};
    use crate::scrape::decoder::{DecodeError, TextDecoder};
    use crate::storage::MemoryStorage;
    use bytes::Bytes;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    fn result(payload: &'static str, labels: Labels) -> ScrapeResult {
        ScrapeResult::new(
            Arc::from("node"),
            Arc::from("http://localhost:9100/metrics"),
            Bytes::from_static(payload.as_bytes()),
            Arc::new(labels),
            NOW,
        )
    }

    fn pipeline(storage: Arc<MemoryStorage>, capacity: usize) -> IngestionPipeline {
        IngestionPipeline::with_capacity(
            storage,
            Arc::new(TextDecoder::new()),
            CancellationToken::new(),
            capacity,
        )
    }

    #[tokio::test]
    async fn test_ingest_attaches_target_and_job_labels() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = pipeline(Arc::clone(&storage), 16);
        pipeline.start();

        let labels: Labels = [("region", "us"), ("host", "override")].into_iter().collect();
        pipeline
            .submit(result("cpu{host=\"raw\"} 0.5\n", labels))
            .await
            .unwrap();
        pipeline.stop().await;

        let expected: Labels = [("host", "override"), ("region", "us"), ("job", "node")]
            .into_iter()
            .collect();
        let series = storage.query(&Metric::new("cpu", expected), NOW).unwrap();
        assert_eq!(series.samples, vec![Sample::new(NOW, 0.5)]);
    }

    #[tokio::test]
    async fn test_target_job_label_wins() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = pipeline(Arc::clone(&storage), 16);
        pipeline.start();

        let labels: Labels = [("job", "custom")].into_iter().collect();
        pipeline.submit(result("up 1\n", labels.clone())).await.unwrap();
        pipeline.stop().await;

        assert!(storage.query(&Metric::new("up", labels), NOW).is_ok());
    }

    #[tokio::test]
    async fn test_decode_failure_does_not_stop_consumer() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = pipeline(Arc::clone(&storage), 16);
        pipeline.start();

        pipeline.submit(result("garbage line here\n", Labels::new())).await.unwrap();
        pipeline.submit(result("up 1\n", Labels::new())).await.unwrap();
        pipeline.stop().await;

        assert_eq!(storage.series_count(), 1);
        let up = Metric::new("up", [("job", "node")].into_iter().collect());
        assert_eq!(storage.query(&up, NOW).unwrap().samples.len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_blocks_until_consumer_starts() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = Arc::new(pipeline(Arc::clone(&storage), 2));

        pipeline.submit(result("a 1\n", Labels::new())).await.unwrap();
        pipeline.submit(result("b 1\n", Labels::new())).await.unwrap();
        assert_eq!(pipeline.remaining_capacity(), 0);

        let blocked = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.submit(result("c 1\n", Labels::new())).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        pipeline.start();
        let submitted = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("submitter still blocked after consumer started")
            .unwrap();
        assert_eq!(submitted, Ok(()));

        pipeline.stop().await;
        assert_eq!(storage.series_count(), 3);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiting_submitter() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = Arc::new(pipeline(Arc::clone(&storage), 1));
        pipeline.submit(result("a 1\n", Labels::new())).await.unwrap();

        let blocked = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.submit(result("b 1\n", Labels::new())).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());

        pipeline.stop().await;
        let outcome = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("submitter still blocked after cancellation")
            .unwrap();
        assert_eq!(outcome, Err(PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_cancelled() {
        let storage = Arc::new(MemoryStorage::new());
        let pipeline = pipeline(Arc::clone(&storage), 4);
        pipeline.start();
        pipeline.stop().await;
        pipeline.stop().await;

        assert!(pipeline.is_cancelled());
        assert_eq!(
            pipeline.submit(result("up 1\n", Labels::new())).await,
            Err(PipelineError::Cancelled)
        );
        assert_eq!(storage.series_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_drains_queued_results() {
        struct SlowDecoder;
        impl Decoder for SlowDecoder {
            fn decode(&self, payload: &[u8], ts: i64) -> Result<Vec<(Metric, Sample)>, DecodeError> {
                std::thread::sleep(Duration::from_millis(5));
                TextDecoder::new().decode(payload, ts)
            }
        }

        let storage = Arc::new(MemoryStorage::new());
        let pipeline = IngestionPipeline::with_capacity(
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::new(SlowDecoder),
            CancellationToken::new(),
            64,
        );
        for _ in 0..20 {
            pipeline.submit(result("up 1\n", Labels::new())).await.unwrap();
        }
        pipeline.start();
        pipeline.stop().await;

        let up = Metric::new("up", [("job", "node")].into_iter().collect());
        assert_eq!(storage.query_range(&up, i64::MIN, i64::MAX).unwrap().len(), 20);
    }
}
