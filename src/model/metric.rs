use std::fmt;

use super::label::Labels;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

/// A metric name plus its label set.
///
/// Metrics are value objects: once built they are not mutated, and the
/// `with_*` helpers return a new metric. The storage key is derived from the
/// canonical form on every call to [`Metric::fingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metric {
    name: String,
    labels: Labels,
}

impl Metric {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Metric {
            name: name.into(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn with_label(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = self.labels.clone();
        labels.insert(name, value);
        Metric::new(self.name.clone(), labels)
    }

    /// Returns a copy with `extra` merged over the existing labels.
    pub fn with_labels(&self, extra: &Labels) -> Self {
        let mut labels = self.labels.clone();
        labels.merge(extra);
        Metric::new(self.name.clone(), labels)
    }

    /// 64-bit FNV-1a hash of the canonical string `name{a=1,b=2}`.
    pub fn fingerprint(&self) -> u64 {
        fnv1a(self.to_string().as_bytes())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.name, self.labels)
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
