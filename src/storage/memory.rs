use std::collections::HashMap;

use parking_lot::RwLock;

use super::{Result, Storage, StorageError};
use crate::model::{Metric, Sample, Series};
use crate::Settings;

/// In-process store keyed by metric fingerprint.
///
/// One reader/writer lock guards the whole map: appends and deletes take the
/// write lock, queries share the read lock. Samples are kept in append order
/// and never trimmed, so query cost grows linearly with series length.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    series: RwLock<HashMap<u64, Series>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            series: RwLock::new(HashMap::new()),
        }
    }

    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    pub fn sample_count(&self) -> usize {
        self.series.read().values().map(Series::len).sum()
    }

    fn query_with_lookback(&self, metric: &Metric, timestamp: i64, lookback: i64) -> Result<Series> {
        let fp = metric.fingerprint();
        let guard = self.series.read();
        let series = guard
            .get(&fp)
            .ok_or_else(|| StorageError::SeriesNotFound(metric.to_string()))?;

        let min_ts = timestamp.saturating_sub(lookback);
        let mut latest: Option<&Sample> = None;
        for sample in &series.samples {
            if sample.timestamp < min_ts || sample.timestamp > timestamp {
                continue;
            }
            // Strictly greater: the first sample seen at the max timestamp wins.
            if latest.map_or(true, |l| sample.timestamp > l.timestamp) {
                latest = Some(sample);
            }
        }

        let samples = latest.map(|s| vec![*s]).unwrap_or_default();
        Ok(Series::with_samples(series.metric.clone(), samples))
    }
}

fn check_metric(metric: &Metric) -> Result<()> {
    if metric.name().is_empty() {
        return Err(StorageError::NilMetric);
    }
    Ok(())
}

impl Storage for MemoryStorage {
    fn append(&self, metric: &Metric, sample: Sample) -> Result<()> {
        check_metric(metric)?;
        let fp = metric.fingerprint();
        let mut guard = self.series.write();
        guard
            .entry(fp)
            .or_insert_with(|| Series::new(metric.clone()))
            .push(sample);
        Ok(())
    }

    fn query(&self, metric: &Metric, timestamp: i64) -> Result<Series> {
        check_metric(metric)?;
        self.query_with_lookback(metric, timestamp, Settings::LOOKBACK_DELTA_MS)
    }

    fn query_range(&self, metric: &Metric, start: i64, end: i64) -> Result<Series> {
        check_metric(metric)?;
        if start > end {
            return Err(StorageError::InvalidRange { start, end });
        }
        let fp = metric.fingerprint();
        let guard = self.series.read();
        let series = guard
            .get(&fp)
            .ok_or_else(|| StorageError::SeriesNotFound(metric.to_string()))?;

        let samples = series
            .samples
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .copied()
            .collect();
        Ok(Series::with_samples(series.metric.clone(), samples))
    }

    fn delete(&self, metric: &Metric) -> Result<()> {
        check_metric(metric)?;
        let fp = metric.fingerprint();
        self.series.write().remove(&fp);
        Ok(())
    }
}
