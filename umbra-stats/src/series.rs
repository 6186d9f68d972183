#![forbid(unsafe_code)]

//! Unbounded collector backed by a growable vec. Storage and aggregation are
//! both O(n), so this is meant for ephemeral use: operator-driven offline
//! training and the online trainer's candidate cohort, where exact sample
//! recovery is needed for the distribution test.

use std::sync::Mutex;
use std::time::Duration;

use crate::collector::{aggregate_seconds, Aggregation, Collector};

#[derive(Default)]
pub struct SeriesCollector {
    samples: Mutex<Vec<f64>>,
}

impl SeriesCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Collector for SeriesCollector {
    fn add(&self, t: Duration) {
        let mut samples = self.samples.lock().expect("series lock poisoned");
        samples.push(t.as_secs_f64());
    }

    fn aggregate(&self) -> Aggregation {
        let samples = self.samples.lock().expect("series lock poisoned");
        aggregate_seconds(&samples)
    }

    fn all(&self) -> Vec<f64> {
        let samples = self.samples.lock().expect("series lock poisoned");
        samples.clone()
    }

    fn len(&self) -> usize {
        let samples = self.samples.lock().expect("series lock poisoned");
        samples.len()
    }

    fn reset(&self) {
        let mut samples = self.samples.lock().expect("series lock poisoned");
        samples.clear();
    }
}
