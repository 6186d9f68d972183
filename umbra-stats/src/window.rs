#![forbid(unsafe_code)]

//! Bounded ring collector. Constant memory, O(1) add; the window holds the
//! most recent `capacity` samples and older samples are overwritten. Used by
//! the production control loop and the online trainer's control cohort.

use std::sync::Mutex;
use std::time::Duration;

use crate::collector::{aggregate_seconds, Aggregation, Collector};

pub struct WindowCollector {
    inner: Mutex<Ring>,
}

struct Ring {
    /// Samples in seconds. Grows until `capacity`, then wraps.
    samples: Vec<f64>,
    capacity: usize,
    /// Next overwrite position once the ring is full.
    next: usize,
}

impl WindowCollector {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "window capacity must be non-zero");
        Self {
            inner: Mutex::new(Ring {
                samples: Vec::with_capacity(capacity),
                capacity,
                next: 0,
            }),
        }
    }
}

impl Collector for WindowCollector {
    fn add(&self, t: Duration) {
        let mut ring = self.inner.lock().expect("window lock poisoned");
        let secs = t.as_secs_f64();
        if ring.samples.len() < ring.capacity {
            ring.samples.push(secs);
        } else {
            let at = ring.next;
            ring.samples[at] = secs;
            ring.next = (at + 1) % ring.capacity;
        }
    }

    fn aggregate(&self) -> Aggregation {
        let ring = self.inner.lock().expect("window lock poisoned");
        aggregate_seconds(&ring.samples)
    }

    fn all(&self) -> Vec<f64> {
        let ring = self.inner.lock().expect("window lock poisoned");
        ring.samples.clone()
    }

    fn len(&self) -> usize {
        let ring = self.inner.lock().expect("window lock poisoned");
        ring.samples.len()
    }

    fn reset(&self) {
        let mut ring = self.inner.lock().expect("window lock poisoned");
        ring.samples.clear();
        ring.next = 0;
    }
}
