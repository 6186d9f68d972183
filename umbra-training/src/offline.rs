#![forbid(unsafe_code)]

//! Offline training mode support. While the mode is active every filtered
//! request is shed according to the path probabilities alone and response
//! times accumulate in an unbounded collector that the operator reads back
//! through the admin API between load runs.

use std::time::Duration;

use umbra_stats::{Aggregation, Collector, SeriesCollector};

#[derive(Default)]
pub struct OfflineTraining {
    response_times: SeriesCollector,
}

impl OfflineTraining {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response_time(&self, t: Duration) {
        self.response_times.add(t);
    }

    pub fn response_time_metrics(&self) -> Aggregation {
        self.response_times.aggregate()
    }

    pub fn reset_collector(&self) {
        self.response_times.reset();
    }
}
