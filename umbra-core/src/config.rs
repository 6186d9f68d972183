#![forbid(unsafe_code)]

//! Umbra configuration handling. Parses a TOML file into a strongly-typed
//! structure and validates it at startup; invalid gains, probabilities or
//! percentile keys are fatal before the proxy binds its sockets.

use serde::Deserialize;
use std::{fs, path::Path};

use crate::UmbraError;

/// Primary configuration structure shared across Umbra components.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UmbraConfig {
    pub proxying: Proxying,
    pub admin: Admin,
    pub logging: Logging,
    pub dimming: Dimming,
}

impl Default for UmbraConfig {
    fn default() -> Self {
        Self {
            proxying: Proxying::default(),
            admin: Admin::default(),
            logging: Logging::default(),
            dimming: Dimming::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Proxying {
    /// Port the dimming gateway listens on.
    pub frontend_port: u16,
    pub backend_host: String,
    pub backend_port: u16,
    /// Upper bound on pooled backend connections.
    pub max_conns: usize,
}

impl Default for Proxying {
    fn default() -> Self {
        Self {
            frontend_port: 8078,
            backend_host: "localhost".to_string(),
            backend_port: 8080,
            max_conns: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Admin {
    /// Port of the admin API used to switch modes and edit probabilities.
    pub port: u16,
}

impl Default for Admin {
    fn default() -> Self {
        Self { port: 8079 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// Logging verbosity (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Dimming {
    /// Whether the server boots in `Dimming` mode rather than `Disabled`.
    pub enabled: bool,
    pub controller: Controller,
    /// Components eligible for shedding. Paths not listed here are always
    /// proxied untouched.
    pub dimmable_paths: Vec<DimmablePath>,
    pub profiler: Profiler,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Controller {
    /// Minimum seconds between PID recomputations.
    pub sample_period: f64,
    /// Response-time percentile fed to the PID: `p50`, `p75` or `p95`.
    pub percentile: String,
    /// Target response time in seconds for the chosen percentile.
    pub setpoint: f64,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Number of recent requests aggregated per control tick.
    pub window: usize,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            sample_period: 1.0,
            percentile: "p95".to_string(),
            setpoint: 3.0,
            kp: 2.0,
            ki: 0.2,
            kd: 0.0,
            window: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DimmablePath {
    pub path: String,
    /// HTTP method the rule applies to. Ignored when `match_all_methods`.
    pub method: Option<String>,
    pub match_all_methods: bool,
    /// Per-path shed probability. Defaults to 1.0 when omitted.
    pub probability: Option<f64>,
    /// Referer substrings that exempt a matching request from dimming.
    pub exclusions: Vec<RefererExclusion>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RefererExclusion {
    pub substring: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Profiler {
    pub enabled: bool,
    /// Name of the session cookie identifying a user across requests.
    pub session_cookie: String,
    pub probabilities: ProfilerProbabilities,
}

impl Default for Profiler {
    fn default() -> Self {
        Self {
            enabled: false,
            session_cookie: "SESSION_ID".to_string(),
            probabilities: ProfilerProbabilities::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfilerProbabilities {
    pub low: f64,
    pub high: f64,
    pub low_multiplier: f64,
    pub high_multiplier: f64,
}

impl Default for ProfilerProbabilities {
    fn default() -> Self {
        Self {
            low: 0.99,
            high: 0.01,
            low_multiplier: 1.0,
            high_multiplier: 1.0,
        }
    }
}

impl UmbraConfig {
    /// Load a configuration file from the given path and validate it.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::UmbraResult<Self> {
        let data = fs::read_to_string(&path).map_err(UmbraError::from)?;
        Self::from_str(&data)
    }

    /// Parse configuration from a TOML string and validate it.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(data: &str) -> crate::UmbraResult<Self> {
        let cfg = toml::from_str::<UmbraConfig>(data).map_err(UmbraError::ConfigParse)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> crate::UmbraResult<()> {
        let c = &self.dimming.controller;
        if c.kp < 0.0 || c.ki < 0.0 || c.kd < 0.0 {
            return Err(UmbraError::Config(format!(
                "controller gains must be non-negative; got kp = {}, ki = {}, kd = {}",
                c.kp, c.ki, c.kd
            )));
        }
        if c.sample_period <= 0.0 {
            return Err(UmbraError::Config(format!(
                "controller sample_period must be positive; got {}",
                c.sample_period
            )));
        }
        if c.setpoint <= 0.0 {
            return Err(UmbraError::Config(format!(
                "controller setpoint must be positive; got {}",
                c.setpoint
            )));
        }
        if !matches!(c.percentile.as_str(), "p50" | "p75" | "p95") {
            return Err(UmbraError::Config(format!(
                "controller percentile must be one of p50, p75, p95; got {:?}",
                c.percentile
            )));
        }
        if c.window == 0 {
            return Err(UmbraError::Config(
                "controller window must be non-zero".to_string(),
            ));
        }

        for component in &self.dimming.dimmable_paths {
            if component.path.is_empty() {
                return Err(UmbraError::Config(
                    "dimmable path must not be empty".to_string(),
                ));
            }
            if !component.match_all_methods && component.method.is_none() {
                return Err(UmbraError::Config(format!(
                    "dimmable path {:?} needs either a method or match_all_methods",
                    component.path
                )));
            }
            if let Some(p) = component.probability {
                if !(0.0..=1.0).contains(&p) {
                    return Err(UmbraError::Config(format!(
                        "probability for path {:?} must be within [0, 1]; got {}",
                        component.path, p
                    )));
                }
            }
        }

        let probs = &self.dimming.profiler.probabilities;
        for (name, p) in [("low", probs.low), ("high", probs.high)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(UmbraError::Config(format!(
                    "profiler probability {name} must be within [0, 1]; got {p}"
                )));
            }
        }
        for (name, m) in [
            ("low_multiplier", probs.low_multiplier),
            ("high_multiplier", probs.high_multiplier),
        ] {
            if m < 0.0 {
                return Err(UmbraError::Config(format!(
                    "profiler {name} must be non-negative; got {m}"
                )));
            }
        }
        if self.dimming.profiler.enabled && self.dimming.profiler.session_cookie.is_empty() {
            return Err(UmbraError::Config(
                "profiler requires a session_cookie name".to_string(),
            ));
        }

        Ok(())
    }
}
