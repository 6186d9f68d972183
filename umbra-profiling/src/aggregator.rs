#![forbid(unsafe_code)]

//! Rolling counts of low- and high-priority visits. The counters decay by
//! integer division on a fixed period, approximating a sliding window
//! without storing per-request timestamps.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::Priority;

pub const DECAY_PERIOD: Duration = Duration::from_secs(30);
const DECAY_FACTOR: i32 = 2;

/// Visit counters are atomic so marking a visit adds no lock to the request
/// path. The lock exists only so the decay step halves both counters as a
/// pair, keeping their ratio consistent for readers.
#[derive(Debug, Default)]
pub struct PriorityVisitAggregator {
    low_count: AtomicI32,
    high_count: AtomicI32,
    decay_lock: RwLock<()>,
}

impl PriorityVisitAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_visit(&self, priority: Priority) {
        match priority {
            Priority::Low => {
                self.low_count.fetch_add(1, Ordering::Relaxed);
            }
            Priority::High => {
                self.high_count.fetch_add(1, Ordering::Relaxed);
            }
            Priority::Unknown => {}
        }
    }

    pub fn low_visits(&self) -> i32 {
        let _guard = self.decay_lock.read().expect("decay lock poisoned");
        self.low_count.load(Ordering::Relaxed)
    }

    pub fn high_visits(&self) -> i32 {
        let _guard = self.decay_lock.read().expect("decay lock poisoned");
        self.high_count.load(Ordering::Relaxed)
    }

    /// Halve both counters. Runs on the decay task; exposed for tests.
    pub fn decay(&self) {
        let _guard = self.decay_lock.write().expect("decay lock poisoned");
        self.low_count
            .store(self.low_count.load(Ordering::Relaxed) / DECAY_FACTOR, Ordering::Relaxed);
        self.high_count
            .store(self.high_count.load(Ordering::Relaxed) / DECAY_FACTOR, Ordering::Relaxed);
    }

    /// Periodic decay driver. Spawned once on server start and lives for the
    /// process lifetime.
    pub async fn run_decay(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // The first tick completes immediately.
        loop {
            ticker.tick().await;
            self.decay();
        }
    }
}
