#![forbid(unsafe_code)]

//! Server dimming modes. Transitions are serialized by the server's
//! operations lock; the handler only ever reads the current mode.

use std::str::FromStr;

use umbra_core::UmbraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimmingMode {
    /// Proxy everything untouched; response times are still collected.
    Disabled,
    /// Shed every filtered request so an operator can profile the site's
    /// optional components under load.
    OfflineTraining,
    /// Closed-loop dimming from the PID output.
    Dimming,
    /// Dimming with priority-biased session shedding.
    DimmingWithProfiling,
    /// Dimming with the candidate-cohort A/B trainer running.
    DimmingWithOnlineTraining,
}

impl std::fmt::Display for DimmingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disabled => "Disabled",
            Self::OfflineTraining => "OfflineTraining",
            Self::Dimming => "Dimming",
            Self::DimmingWithProfiling => "DimmingWithProfiling",
            Self::DimmingWithOnlineTraining => "DimmingWithOnlineTraining",
        };
        write!(f, "{name}")
    }
}

impl FromStr for DimmingMode {
    type Err = UmbraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Disabled" => Ok(Self::Disabled),
            "OfflineTraining" => Ok(Self::OfflineTraining),
            "Dimming" => Ok(Self::Dimming),
            "DimmingWithProfiling" => Ok(Self::DimmingWithProfiling),
            "DimmingWithOnlineTraining" => Ok(Self::DimmingWithOnlineTraining),
            other => Err(UmbraError::State(format!(
                "mode must be one of {{Disabled|OfflineTraining|Dimming|DimmingWithProfiling|DimmingWithOnlineTraining}}; got {other:?}"
            ))),
        }
    }
}
