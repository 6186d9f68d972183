#![forbid(unsafe_code)]

//! Priority-biased shed probabilities. The profiler keeps the *relative*
//! shedding rate between priority classes at the configured ratio whatever
//! the current traffic mix: when one class disappears, the other's shed
//! probability moves toward its own cap instead of collapsing.

use std::sync::Arc;

use rand::Rng;

use umbra_core::{UmbraError, UmbraResult};

use crate::{PriorityFetcher, PriorityVisitAggregator, Priority, RequestWriter};

/// Baseline shed probabilities and their multiplier caps per priority class.
#[derive(Debug, Clone, Copy)]
pub struct DimmingProbabilities {
    pub low: f64,
    pub high: f64,
    pub low_multiplier: f64,
    pub high_multiplier: f64,
}

impl DimmingProbabilities {
    pub fn validate(&self) -> UmbraResult<()> {
        for (name, p) in [("low", self.low), ("high", self.high)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(UmbraError::Config(format!(
                    "profiler probability {name} must be within [0, 1]; got {p}"
                )));
            }
        }
        for (name, m) in [
            ("low_multiplier", self.low_multiplier),
            ("high_multiplier", self.high_multiplier),
        ] {
            if m < 0.0 {
                return Err(UmbraError::Config(format!(
                    "profiler {name} must be non-negative; got {m}"
                )));
            }
        }
        Ok(())
    }
}

impl Default for DimmingProbabilities {
    fn default() -> Self {
        Self {
            low: 0.99,
            high: 0.01,
            low_multiplier: 1.0,
            high_multiplier: 1.0,
        }
    }
}

pub struct Profiler {
    pub priorities: Arc<dyn PriorityFetcher>,
    pub requests: Arc<dyn RequestWriter>,
    aggregator: Arc<PriorityVisitAggregator>,
    probabilities: DimmingProbabilities,
}

impl Profiler {
    pub fn new(
        priorities: Arc<dyn PriorityFetcher>,
        requests: Arc<dyn RequestWriter>,
        aggregator: Arc<PriorityVisitAggregator>,
        probabilities: DimmingProbabilities,
    ) -> UmbraResult<Self> {
        probabilities.validate()?;
        Ok(Self {
            priorities,
            requests,
            aggregator,
            probabilities,
        })
    }

    pub fn aggregator(&self) -> Arc<PriorityVisitAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Record a profiled request so the visit mix tracks current traffic.
    pub fn record_visit(&self, priority: Priority) {
        self.aggregator.mark_visit(priority);
    }

    /// Shed probability for a session of the given priority under the
    /// current visit mix. Counters enter the expectation incremented by one
    /// so an empty window cannot divide by zero.
    pub fn dimming_probability(&self, priority: Priority) -> f64 {
        let low_visits = (self.aggregator.low_visits() + 1) as f64;
        let high_visits = (self.aggregator.high_visits() + 1) as f64;
        let p = &self.probabilities;

        let expectation = p.low * low_visits + p.high * high_visits;

        match priority {
            Priority::Low => p.low_multiplier * p.low * (low_visits / expectation),
            Priority::High => p.high_multiplier * p.high * (high_visits / expectation),
            Priority::Unknown => 0.0,
        }
    }

    /// Roll a long-term dimming decision for the session.
    pub fn sample_should_dim(&self, priority: Priority) -> bool {
        rand::thread_rng().gen::<f64>() < self.dimming_probability(priority)
    }
}
