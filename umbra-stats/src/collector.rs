#![forbid(unsafe_code)]

//! Response-time aggregation. Collectors receive raw request durations from
//! handler tasks and hand percentile aggregates to the control loop.

use std::str::FromStr;
use std::time::Duration;

use umbra_core::UmbraError;

/// Percentile of the response-time distribution fed to the PID controller.
/// Chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PercentileKey {
    P50,
    P75,
    P95,
}

impl FromStr for PercentileKey {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p50" => Ok(Self::P50),
            "p75" => Ok(Self::P75),
            "p95" => Ok(Self::P95),
            other => Err(UmbraError::Config(format!(
                "percentile must be one of p50, p75, p95; got {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for PercentileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P50 => write!(f, "p50"),
            Self::P75 => write!(f, "p75"),
            Self::P95 => write!(f, "p95"),
        }
    }
}

/// Percentile triple over the collected window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub p50: Duration,
    pub p75: Duration,
    pub p95: Duration,
}

impl Aggregation {
    pub fn percentile(&self, key: PercentileKey) -> Duration {
        match key {
            PercentileKey::P50 => self.p50,
            PercentileKey::P75 => self.p75,
            PercentileKey::P95 => self.p95,
        }
    }
}

/// Capability set shared by the bounded and unbounded collectors. `add` must
/// be safe to call concurrently from handler tasks while a loop task calls
/// `aggregate` or `reset`.
pub trait Collector: Send + Sync {
    /// Record a new response time.
    fn add(&self, t: Duration);
    /// Percentile aggregates over the currently-held samples.
    fn aggregate(&self) -> Aggregation;
    /// All held samples in seconds, for distribution tests.
    fn all(&self) -> Vec<f64>;
    /// Number of currently-held samples.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Drop all samples so the collector can be reused.
    fn reset(&self);
}

/// Aggregate a set of samples (seconds) into a percentile triple. Sorts a
/// copy; callers on the hot path should aggregate from a loop task, not per
/// request.
pub(crate) fn aggregate_seconds(samples: &[f64]) -> Aggregation {
    if samples.is_empty() {
        return Aggregation::default();
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).expect("response times are finite"));

    Aggregation {
        p50: secs_to_duration(median_of_sorted(&sorted)),
        p75: secs_to_duration(percentile_of_sorted(&sorted, 75.0)),
        p95: secs_to_duration(percentile_of_sorted(&sorted, 95.0)),
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

/// Median: mean of the two middle samples for even-sized input.
fn median_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Nearest-rank percentile over sorted samples.
fn percentile_of_sorted(sorted: &[f64], pct: f64) -> f64 {
    let n = sorted.len();
    let rank = ((pct / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}
