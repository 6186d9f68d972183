#![forbid(unsafe_code)]

//! Session-behaviour log interface. Writes are fire-and-forget; the proxy
//! never waits on the profiling pipeline.

use tracing::info;

pub trait RequestWriter: Send + Sync {
    /// Log a session request so the session's behaviour can be profiled.
    fn write(&self, session_id: &str, method: &str, path: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRequestWriter;

impl RequestWriter for NoopRequestWriter {
    fn write(&self, _session_id: &str, _method: &str, _path: &str) {}
}

/// Writer emitting structured log events, useful when the profiling pipeline
/// tails the proxy's logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRequestWriter;

impl RequestWriter for TracingRequestWriter {
    fn write(&self, session_id: &str, method: &str, path: &str) {
        info!(session_id, method, path, "profiled request");
    }
}
