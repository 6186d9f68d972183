#![forbid(unsafe_code)]

//! Common error type for Umbra crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UmbraError {
    /// Invalid configuration detected at startup. Fatal: the server refuses
    /// to boot with out-of-range gains or probabilities.
    #[error("configuration error: {0}")]
    Config(String),

    /// An operation was attempted against the wrong lifecycle state, e.g.
    /// starting an already-started server or stopping an idle loop.
    #[error("invalid state: {0}")]
    State(String),

    /// A backend proxy exchange failed. Recovered locally by the request
    /// handler; the latency is still fed back to the control loop.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// I/O related failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing failures.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Convenient alias for results throughout Umbra crates.
pub type UmbraResult<T> = Result<T, UmbraError>;
