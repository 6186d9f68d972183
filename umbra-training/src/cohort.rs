#![forbid(unsafe_code)]

//! Control/candidate traffic split for online training. The cohort is a
//! session cookie sampled once per user; candidate users are served the
//! experimental path probabilities while control users stay on the live set.

use rand::Rng;

pub const ONLINE_TRAINING_COOKIE: &str = "ONLINE_TRAINING";
const CONTROL_VALUE: &str = "CONTROL";
const CANDIDATE_VALUE: &str = "CANDIDATE";

/// Fraction of newly-sampled sessions assigned to the candidate cohort. Kept
/// small so a regressing candidate probability set hurts few users.
pub const CANDIDATE_PROBABILITY: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cohort {
    Control,
    Candidate,
}

impl Cohort {
    /// Interpret a cookie value. Unrecognized values fall back to control so
    /// a tampered cookie cannot join the experiment.
    pub fn from_cookie_value(value: &str) -> Self {
        if value == CANDIDATE_VALUE {
            Self::Candidate
        } else {
            Self::Control
        }
    }

    fn cookie_value(self) -> &'static str {
        match self {
            Self::Control => CONTROL_VALUE,
            Self::Candidate => CANDIDATE_VALUE,
        }
    }

    /// Draw a cohort for a fresh session.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen::<f64>() < CANDIDATE_PROBABILITY {
            Self::Candidate
        } else {
            Self::Control
        }
    }

    /// `Set-Cookie` value assigning this cohort. Session-scoped: no expiry.
    pub fn set_cookie(self) -> String {
        format!("{ONLINE_TRAINING_COOKIE}={}; Path=/", self.cookie_value())
    }
}
