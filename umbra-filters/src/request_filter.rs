#![forbid(unsafe_code)]

//! Method/path/referer matching for dimmable components.

use std::collections::{HashMap, HashSet};

use umbra_core::{UmbraError, UmbraResult};

use crate::with_leading_slash;

/// Methods covered by [`RequestFilter::add_for_all_methods`].
pub const ALL_METHODS: [&str; 7] = ["GET", "HEAD", "OPTIONS", "POST", "PUT", "PATCH", "DELETE"];

/// Checks whether a path/method/referer combination names a dimmable
/// component. A match can be suppressed when the request's Referer header
/// contains one of the rule's exclusion substrings.
///
/// Matching is insensitive to the path's leading slash: `add` inserts rules
/// under both spellings so `matches` is a single hash lookup without string
/// rewriting on the request path. The filter is built during startup and
/// only read afterwards, so it carries no lock.
#[derive(Debug, Default)]
pub struct RequestFilter {
    rules: HashSet<String>,
    referer_exclusions: HashMap<String, Vec<String>>,
}

impl RequestFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff a rule exists for the path and method and no exclusion
    /// substring occurs in the referer. The path is matched exactly; query
    /// strings and fragments are expected to be stripped by the caller.
    pub fn matches(&self, path: &str, method: &str, referer: &str) -> bool {
        let rule = rule_key(path, method);

        if !self.rules.contains(&rule) {
            return false;
        }

        if let Some(substrings) = self.referer_exclusions.get(&rule) {
            if substrings.iter().any(|s| referer.contains(s.as_str())) {
                return false;
            }
        }

        true
    }

    /// Register a rule for the path and method, inclusive and exclusive of
    /// the leading slash.
    pub fn add(&mut self, path: &str, method: &str) {
        let slashed = with_leading_slash(path);
        self.rules.insert(rule_key(&slashed[1..], method));
        self.rules.insert(rule_key(&slashed, method));
    }

    pub fn add_for_all_methods(&mut self, path: &str) {
        for method in ALL_METHODS {
            self.add(path, method);
        }
    }

    /// Register a referer substring that exempts requests matching an
    /// existing rule. Fails if no rule exists for the path and method.
    pub fn add_referer_exclusion(
        &mut self,
        path: &str,
        method: &str,
        substring: &str,
    ) -> UmbraResult<()> {
        let slashed = with_leading_slash(path);
        let rule = rule_key(&slashed, method);
        let rule_without_slash = rule_key(&slashed[1..], method);

        if !self.rules.contains(&rule) {
            return Err(UmbraError::State(format!(
                "no rule registered for {method} {slashed}; add the path before excluding referers"
            )));
        }

        self.referer_exclusions
            .entry(rule)
            .or_default()
            .push(substring.to_string());
        self.referer_exclusions
            .entry(rule_without_slash)
            .or_default()
            .push(substring.to_string());

        Ok(())
    }
}

fn rule_key(path: &str, method: &str) -> String {
    format!("{method} {path}")
}
