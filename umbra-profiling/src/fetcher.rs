#![forbid(unsafe_code)]

//! Priority lookup backend interface. Production deployments back this with
//! a key-value store fed by an external profiling pipeline.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::Priority;

#[async_trait]
pub trait PriorityFetcher: Send + Sync {
    /// Retrieve the priority for a session, `Unknown` if absent.
    async fn fetch(&self, session_id: &str) -> Priority;

    /// Ask the backend to compute a priority for an unprofiled session.
    /// Fire-and-forget: the result arrives through later `fetch` calls.
    async fn profile(&self, session_id: &str);
}

/// In-memory fetcher for tests and default wiring. `profile` records the
/// request so callers can observe it.
#[derive(Debug, Default)]
pub struct StaticPriorityFetcher {
    priorities: RwLock<HashMap<String, Priority>>,
    profile_requests: RwLock<Vec<String>>,
}

impl StaticPriorityFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: &str, priority: Priority) {
        self.priorities
            .write()
            .expect("priorities lock poisoned")
            .insert(session_id.to_string(), priority);
    }

    pub fn profile_requests(&self) -> Vec<String> {
        self.profile_requests
            .read()
            .expect("profile requests lock poisoned")
            .clone()
    }
}

#[async_trait]
impl PriorityFetcher for StaticPriorityFetcher {
    async fn fetch(&self, session_id: &str) -> Priority {
        self.priorities
            .read()
            .expect("priorities lock poisoned")
            .get(session_id)
            .copied()
            .unwrap_or(Priority::Unknown)
    }

    async fn profile(&self, session_id: &str) {
        self.profile_requests
            .write()
            .expect("profile requests lock poisoned")
            .push(session_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_sessions_fetch_unknown() {
        let fetcher = StaticPriorityFetcher::new();
        assert_eq!(fetcher.fetch("nobody").await, Priority::Unknown);
    }

    #[tokio::test]
    async fn stored_priorities_are_returned() {
        let fetcher = StaticPriorityFetcher::new();
        fetcher.insert("s1", Priority::High);
        assert_eq!(fetcher.fetch("s1").await, Priority::High);
    }

    #[tokio::test]
    async fn profile_requests_are_recorded() {
        let fetcher = StaticPriorityFetcher::new();
        fetcher.profile("s2").await;
        assert_eq!(fetcher.profile_requests(), vec!["s2".to_string()]);
    }
}
