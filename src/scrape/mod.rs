pub mod body;
pub mod decoder;
pub mod fetcher;
pub mod pipeline;
pub mod scheduler;
pub mod target;

pub use body::ScrapeResult;
pub use decoder::{DecodeError, Decoder, TextDecoder};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use pipeline::{IngestionPipeline, PipelineError};
pub use scheduler::Scheduler;
pub use target::{NormalizedJob, Target, TargetTable};
