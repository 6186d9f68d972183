#![forbid(unsafe_code)]

//! Cookie protocol for priority-based profiling. Cookies are the only
//! per-session state the proxy keeps: an absent or malformed cookie is a
//! well-defined state (unknown priority, no decision), never an error.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::Priority;

pub const PRIORITY_COOKIE: &str = "PRIORITY";
pub const DIMMING_DECISION_COOKIE: &str = "DIMMING_DECISION";

/// Unknown priorities expire quickly so sessions get re-profiled.
const UNKNOWN_PRIORITY_EXPIRY: Duration = Duration::from_secs(2 * 60);
const KNOWN_PRIORITY_EXPIRY: Duration = Duration::from_secs(2 * 60 * 60);
/// Dimming decisions are sticky only across a short burst of page loads.
const DIMMING_DECISION_EXPIRY: Duration = Duration::from_secs(60);

/// `Set-Cookie` value recording the session's priority.
pub fn priority_set_cookie(priority: Priority) -> String {
    let expiry = if priority.is_known() {
        KNOWN_PRIORITY_EXPIRY
    } else {
        UNKNOWN_PRIORITY_EXPIRY
    };
    format!(
        "{PRIORITY_COOKIE}={priority}; Max-Age={}; Path=/",
        expiry.as_secs()
    )
}

/// `Set-Cookie` value persisting a session's dim-or-forward verdict.
pub fn dimming_decision_set_cookie(decision: bool) -> String {
    format!(
        "{DIMMING_DECISION_COOKIE}={decision}; Max-Age={}; Path=/",
        DIMMING_DECISION_EXPIRY.as_secs()
    )
}

/// Parse a priority cookie value. Malformed values are logged and treated
/// as an absent cookie.
pub fn parse_priority(value: &str) -> Option<Priority> {
    match Priority::from_str(value) {
        Ok(priority) => Some(priority),
        Err(err) => {
            warn!(value = %err.0, "malformed priority cookie; treating as absent");
            None
        }
    }
}

/// Parse a dimming-decision cookie value. Anything but `true` is a decision
/// not to dim.
pub fn parse_dimming_decision(value: &str) -> bool {
    value == "true"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_cookie_expiry_depends_on_value() {
        assert_eq!(
            priority_set_cookie(Priority::Low),
            "PRIORITY=low; Max-Age=7200; Path=/"
        );
        assert_eq!(
            priority_set_cookie(Priority::High),
            "PRIORITY=high; Max-Age=7200; Path=/"
        );
        assert_eq!(
            priority_set_cookie(Priority::Unknown),
            "PRIORITY=unknown; Max-Age=120; Path=/"
        );
    }

    #[test]
    fn decision_cookie_is_short_lived() {
        assert_eq!(
            dimming_decision_set_cookie(true),
            "DIMMING_DECISION=true; Max-Age=60; Path=/"
        );
        assert_eq!(
            dimming_decision_set_cookie(false),
            "DIMMING_DECISION=false; Max-Age=60; Path=/"
        );
    }

    #[test]
    fn malformed_priority_reads_as_absent() {
        assert_eq!(parse_priority("low"), Some(Priority::Low));
        assert_eq!(parse_priority("VIP"), None);
    }

    #[test]
    fn decision_parsing_defaults_to_forward() {
        assert!(parse_dimming_decision("true"));
        assert!(!parse_dimming_decision("false"));
        assert!(!parse_dimming_decision("1"));
    }
}
