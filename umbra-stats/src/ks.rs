#![forbid(unsafe_code)]

//! Two-sample Kolmogorov-Smirnov rejection test, used by the online trainer
//! to decide whether a candidate probability set produced a genuinely
//! different response-time distribution.

use tracing::debug;

/// Confidence level of the rejection. Coefficients are the standard critical
/// KS coefficients for the two-sample test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    P90,
    P95,
    P97_5,
    P99,
    P99_5,
    P99_9,
}

impl Confidence {
    fn coefficient(self) -> f64 {
        match self {
            Self::P90 => 1.22,
            Self::P95 => 1.36,
            Self::P97_5 => 1.48,
            Self::P99 => 1.63,
            Self::P99_5 => 1.73,
            Self::P99_9 => 1.95,
        }
    }
}

/// Performs a two-tailed two-sample KS test, returning true if the null
/// hypothesis of equal distributions is rejected. Symmetric in its sample
/// arguments. Empty samples never reject.
pub fn ks_rejects(control: &[f64], candidate: &[f64], confidence: Confidence) -> bool {
    if control.is_empty() || candidate.is_empty() {
        return false;
    }

    let n1 = control.len() as f64;
    let n2 = candidate.len() as f64;
    let critical = confidence.coefficient() * ((n1 + n2) / (n1 * n2)).sqrt();

    let mut sorted_control = control.to_vec();
    sorted_control.sort_by(|a, b| a.partial_cmp(b).expect("samples are finite"));
    let mut sorted_candidate = candidate.to_vec();
    sorted_candidate.sort_by(|a, b| a.partial_cmp(b).expect("samples are finite"));

    let statistic = ks_statistic(&sorted_control, &sorted_candidate);
    debug!(statistic, critical, "ks test");

    statistic > critical
}

/// Maximum absolute difference between the two empirical CDFs, evaluated at
/// every sample point. Tied values advance both walkers before comparing.
fn ks_statistic(a: &[f64], b: &[f64]) -> f64 {
    let (n, m) = (a.len(), b.len());
    let (mut i, mut j) = (0usize, 0usize);
    let mut statistic: f64 = 0.0;

    while i < n && j < m {
        let x = a[i].min(b[j]);
        while i < n && a[i] <= x {
            i += 1;
        }
        while j < m && b[j] <= x {
            j += 1;
        }
        let diff = (i as f64 / n as f64 - j as f64 / m as f64).abs();
        statistic = statistic.max(diff);
    }

    statistic
}
