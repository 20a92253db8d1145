pub mod label;
pub mod metric;
pub mod sample;

pub use label::{Label, Labels};
pub use metric::Metric;
pub use sample::{Sample, Series};
