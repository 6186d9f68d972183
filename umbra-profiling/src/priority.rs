#![forbid(unsafe_code)]

//! Session priority as produced by an external profiling backend. Sessions
//! without a computed priority are `Unknown` and treated neutrally.

use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    Unknown,
    Low,
    High,
}

impl Priority {
    /// True for priorities that have actually been profiled.
    pub fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Parse failure carries the offending string for logging; callers fall back
/// to `Unknown` rather than failing the request.
#[derive(Debug)]
pub struct UnknownPriority(pub String);

impl FromStr for Priority {
    type Err = UnknownPriority;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            other => Err(UnknownPriority(other.to_string())),
        }
    }
}
