use super::metric::Metric;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Sample { timestamp, value }
    }
}

/// A metric and its samples, in the order they were appended.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub metric: Metric,
    pub samples: Vec<Sample>,
}

impl Series {
    pub fn new(metric: Metric) -> Self {
        Series {
            metric,
            samples: Vec::new(),
        }
    }

    pub fn with_samples(metric: Metric, samples: Vec<Sample>) -> Self {
        Series { metric, samples }
    }

    pub fn push(&mut self, sample: Sample) {
        self.samples.push(sample);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }
}
