use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The metric carries no name and therefore no identity.
    #[error("metric cannot be nil: empty metric name")]
    NilMetric,

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("series not found: {0}")]
    SeriesNotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
