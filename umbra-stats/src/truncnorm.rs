#![forbid(unsafe_code)]

//! Truncated-normal sampling via the inverse-CDF method: draw u uniformly on
//! [F(lo), F(hi)] and map it back through the normal quantile. Used by the
//! online trainer to perturb candidate shed probabilities inside [0, 1].

use rand::Rng;
use rand_distr::{Distribution, Uniform};

/// Draw from Normal(mean, sigma) truncated to [lo, hi].
pub fn sample_truncated_normal<R: Rng + ?Sized>(
    rng: &mut R,
    lo: f64,
    hi: f64,
    mean: f64,
    sigma: f64,
) -> f64 {
    debug_assert!(lo < hi, "truncation interval must be non-empty");
    if sigma <= 0.0 {
        return mean.clamp(lo, hi);
    }

    let a = normal_cdf((lo - mean) / sigma);
    let b = normal_cdf((hi - mean) / sigma);
    if (b - a).abs() < f64::EPSILON {
        // The interval carries no probability mass (mean far outside).
        return if mean < lo { lo } else { hi };
    }

    let u = Uniform::new(a, b).sample(rng);
    (mean + sigma * normal_quantile(u)).clamp(lo, hi)
}

/// Standard normal CDF via the error function.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Abramowitz & Stegun 7.1.26 rational approximation, |error| < 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// Standard normal quantile (inverse CDF), Acklam's rational approximation.
/// Relative error below 1.15e-9 over the open unit interval; the closed
/// endpoints map to the infinities so callers can clamp.
fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
