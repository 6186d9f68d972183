#![forbid(unsafe_code)]

//! Per-path shed probabilities. Reads happen on every dimmable request;
//! writes come from the admin API and the online trainer's promotion step,
//! so the map sits behind a readers-writer lock.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::Rng;
use umbra_core::{UmbraError, UmbraResult};

use crate::with_leading_slash;

/// A path paired with the probability that a matched request is shed.
#[derive(Debug, Clone, PartialEq)]
pub struct PathProbabilityRule {
    pub path: String,
    pub probability: f64,
}

/// Map from path to shed probability in [0, 1], with a default for absent
/// keys. Like [`crate::RequestFilter`], paths are stored with and without
/// their leading slash so `get` is a single lookup.
pub struct PathProbabilities {
    probabilities: RwLock<HashMap<String, f64>>,
    default_value: f64,
}

impl PathProbabilities {
    pub fn new(default_value: f64) -> UmbraResult<Self> {
        if !(0.0..=1.0).contains(&default_value) {
            return Err(UmbraError::Config(format!(
                "default path probability must be within [0, 1]; got {default_value}"
            )));
        }

        Ok(Self {
            probabilities: RwLock::new(HashMap::new()),
            default_value,
        })
    }

    pub fn default_value(&self) -> f64 {
        self.default_value
    }

    /// The stored probability for the path, or the default when absent.
    pub fn get(&self, path: &str) -> f64 {
        let probabilities = self.probabilities.read().expect("probabilities lock poisoned");
        probabilities.get(path).copied().unwrap_or(self.default_value)
    }

    pub fn set(&self, rule: &PathProbabilityRule) -> UmbraResult<()> {
        if !(0.0..=1.0).contains(&rule.probability) {
            return Err(UmbraError::Config(format!(
                "probability for path {:?} must be within [0, 1]; got {}",
                rule.path, rule.probability
            )));
        }

        let slashed = with_leading_slash(&rule.path);
        let mut probabilities = self.probabilities.write().expect("probabilities lock poisoned");
        probabilities.insert(slashed[1..].to_string(), rule.probability);
        probabilities.insert(slashed, rule.probability);

        Ok(())
    }

    pub fn set_all(&self, rules: &[PathProbabilityRule]) -> UmbraResult<()> {
        for rule in rules {
            self.set(rule)?;
        }
        Ok(())
    }

    pub fn clear(&self) {
        let mut probabilities = self.probabilities.write().expect("probabilities lock poisoned");
        probabilities.clear();
    }

    /// Snapshot of every stored entry, both slash spellings included.
    pub fn list(&self) -> HashMap<String, f64> {
        let probabilities = self.probabilities.read().expect("probabilities lock poisoned");
        probabilities.clone()
    }

    /// Effective probabilities for the given paths, defaults included.
    pub fn list_for_paths(&self, paths: &[String]) -> HashMap<String, f64> {
        paths
            .iter()
            .map(|path| (path.clone(), self.get(path)))
            .collect()
    }

    /// Roll against the path's probability.
    pub fn sample_should_dim(&self, path: &str) -> bool {
        rand::thread_rng().gen::<f64>() < self.get(path)
    }
}
