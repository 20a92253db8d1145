pub mod error;
pub mod memory;

pub use error::{Result, StorageError};
pub use memory::MemoryStorage;

use crate::model::{Metric, Sample, Series};

/// Capability interface over a time-series backend.
///
/// The scrape pipeline only ever talks to a `dyn Storage`, so other backends
/// can be swapped in without touching the scheduler.
pub trait Storage: Send + Sync {
    /// Appends `sample` to the series identified by `metric`, creating it on
    /// first use.
    fn append(&self, metric: &Metric, sample: Sample) -> Result<()>;

    /// Returns the latest sample within the lookback window ending at
    /// `timestamp`. An existing series with nothing in the window yields an
    /// empty series rather than an error.
    fn query(&self, metric: &Metric, timestamp: i64) -> Result<Series>;

    /// Returns every sample with `start <= timestamp <= end`, in append order.
    fn query_range(&self, metric: &Metric, start: i64, end: i64) -> Result<Series>;

    /// Removes the series. Deleting an unknown metric is not an error.
    fn delete(&self, metric: &Metric) -> Result<()>;
}
