#![forbid(unsafe_code)]

//! Online training: a background A/B loop that perturbs one path's candidate
//! shed probability per round, serves it to the small candidate cohort, and
//! promotes the candidate set when it produces a significantly better tail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use umbra_core::{UmbraError, UmbraResult};
use umbra_filters::{PathProbabilities, PathProbabilityRule};
use umbra_stats::{ks_rejects, Collector, Confidence, SeriesCollector, WindowCollector};

/// Sliding window of control-cohort response times per round.
const CONTROL_WINDOW: usize = 2000;

/// Spread of the per-round probability perturbation, chosen empirically: the
/// search must be able to jump out of a local optimum within a few rounds.
const PERTURBATION_SIGMA: f64 = 0.5;

/// A candidate p95 at or below this many seconds means the round collected
/// too little meaningful traffic to judge.
const MIN_CANDIDATE_P95_SECS: f64 = 0.05;

/// The candidate tail must undercut the control tail by at least 15%.
const IMPROVEMENT_FACTOR: f64 = 0.85;

/// Hot-path and evaluation state shared between the trainer task and the
/// request handler.
pub struct TrainerCore {
    control_times: WindowCollector,
    candidate_times: SeriesCollector,
    candidate_probabilities: PathProbabilities,
    /// The live probability set served to the control cohort (and everyone
    /// else); promotion copies the candidate rules into it.
    live_probabilities: Arc<PathProbabilities>,
    paths: Mutex<Vec<String>>,
    last_path_sampled: Mutex<usize>,
    round_wait: Duration,
    /// Armed after a promotion so the next round is skipped while the PID
    /// settles into the new control probabilities. Initially armed for the
    /// same reason on mode entry.
    adjustment_period: AtomicBool,
}

impl TrainerCore {
    /// Candidate-cohort shed roll against the experimental probabilities.
    pub fn sample_candidate_should_dim(&self, path: &str) -> bool {
        self.candidate_probabilities.sample_should_dim(path)
    }

    pub fn add_candidate_response_time(&self, t: Duration) {
        self.candidate_times.add(t);
    }

    pub fn add_control_response_time(&self, t: Duration) {
        self.control_times.add(t);
    }

    /// Current control-cohort samples in seconds.
    pub fn control_samples(&self) -> Vec<f64> {
        self.control_times.all()
    }

    /// Current candidate-cohort samples in seconds.
    pub fn candidate_samples(&self) -> Vec<f64> {
        self.candidate_times.all()
    }

    /// Replace the set of paths being trained. Called when the admin API
    /// rewrites path probabilities.
    pub fn set_paths(&self, paths: Vec<String>) {
        let mut guard = self.paths.lock().expect("paths lock poisoned");
        *guard = paths;
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().expect("paths lock poisoned").clone()
    }

    /// Snapshot of the candidate probabilities for the trained paths.
    pub fn candidate_rules(&self) -> Vec<PathProbabilityRule> {
        self.paths()
            .into_iter()
            .map(|path| {
                let probability = self.candidate_probabilities.get(&path);
                PathProbabilityRule { path, probability }
            })
            .collect()
    }

    /// Start an A/B round: perturb one path's candidate probability via
    /// round-robin, install the new candidate set and clear both cohort
    /// collectors so the round starts from silence.
    pub fn begin_round(&self) -> UmbraResult<Vec<PathProbabilityRule>> {
        let rules = self.sample_candidate_rules();

        self.candidate_probabilities.clear();
        self.candidate_probabilities.set_all(&rules)?;

        debug!(
            control = ?self.live_probabilities.list_for_paths(&self.paths()),
            candidate = ?self.candidate_probabilities.list_for_paths(&self.paths()),
            "starting training round"
        );

        self.candidate_times.reset();
        self.control_times.reset();

        Ok(rules)
    }

    /// Judge the round that just finished. Promotion requires the candidate
    /// cohort to have collected meaningful traffic, a tail at least 15%
    /// better than control, and a KS rejection of the equal-distribution
    /// null. On promotion the candidate rules become the live rules and the
    /// adjustment period is re-armed.
    pub fn finish_round(&self) -> UmbraResult<bool> {
        if !self.candidate_improves_response_times() {
            return Ok(false);
        }

        let rules = self.candidate_rules();
        info!(rules = ?rules, "promoting candidate probabilities");
        self.live_probabilities.set_all(&rules)?;
        self.adjustment_period.store(true, Ordering::SeqCst);

        Ok(true)
    }

    fn candidate_improves_response_times(&self) -> bool {
        let control_p95 = self.control_times.aggregate().p95.as_secs_f64();
        let candidate_p95 = self.candidate_times.aggregate().p95.as_secs_f64();
        debug!(
            control_p95,
            candidate_p95,
            candidate_samples = self.candidate_times.len(),
            "finished training round"
        );

        // Heuristic: a tiny candidate p95 means the cohort saw too little
        // meaningful traffic for a significant comparison.
        if candidate_p95 <= MIN_CANDIDATE_P95_SECS {
            return false;
        }

        if IMPROVEMENT_FACTOR * control_p95 <= candidate_p95 {
            return false;
        }

        ks_rejects(
            &self.control_times.all(),
            &self.candidate_times.all(),
            Confidence::P99_5,
        )
    }

    /// Round-robin perturbation: exactly one path per round gets a fresh
    /// probability drawn from a truncated normal centred on its current
    /// candidate value; the rest carry over unchanged.
    fn sample_candidate_rules(&self) -> Vec<PathProbabilityRule> {
        let paths = self.paths();
        if paths.is_empty() {
            return Vec::new();
        }

        let mut last_sampled = self
            .last_path_sampled
            .lock()
            .expect("last sampled lock poisoned");
        let next_to_sample = (*last_sampled + 1) % paths.len();

        let mut rng = rand::thread_rng();
        let rules = paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let current = self.candidate_probabilities.get(path);
                let probability = if i == next_to_sample {
                    umbra_stats::sample_truncated_normal(
                        &mut rng,
                        0.0,
                        1.0,
                        current,
                        PERTURBATION_SIGMA,
                    )
                } else {
                    current
                };
                PathProbabilityRule {
                    path: path.clone(),
                    probability,
                }
            })
            .collect();

        *last_sampled = next_to_sample;
        rules
    }

    fn reset_collectors(&self) {
        self.candidate_times.reset();
        self.control_times.reset();
    }
}

/// Owns the training task; hot-path state lives in [`TrainerCore`].
pub struct OnlineTrainer {
    core: Arc<TrainerCore>,
    task: Option<TrainerTask>,
}

struct TrainerTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl OnlineTrainer {
    /// The candidate set starts as a copy of the live probabilities for the
    /// trained paths.
    pub fn new(
        live_probabilities: Arc<PathProbabilities>,
        paths: Vec<String>,
        round_wait: Duration,
    ) -> UmbraResult<Self> {
        let candidate_probabilities = PathProbabilities::new(live_probabilities.default_value())?;
        for path in &paths {
            candidate_probabilities.set(&PathProbabilityRule {
                path: path.clone(),
                probability: live_probabilities.get(path),
            })?;
        }

        let last_index = paths.len().saturating_sub(1);
        Ok(Self {
            core: Arc::new(TrainerCore {
                control_times: WindowCollector::new(CONTROL_WINDOW),
                candidate_times: SeriesCollector::new(),
                candidate_probabilities,
                live_probabilities,
                paths: Mutex::new(paths),
                last_path_sampled: Mutex::new(last_index),
                round_wait,
                adjustment_period: AtomicBool::new(true),
            }),
            task: None,
        })
    }

    pub fn core(&self) -> Arc<TrainerCore> {
        Arc::clone(&self.core)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn start_loop(&mut self) -> UmbraResult<()> {
        if self.task.is_some() {
            return Err(UmbraError::State("training loop already started".to_string()));
        }

        // Let the PID settle before the first A/B comparison.
        self.core.adjustment_period.store(true, Ordering::SeqCst);

        let (stop, stop_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(training_loop(core, stop_rx));

        self.task = Some(TrainerTask { stop, handle });
        Ok(())
    }

    /// Stop the training task, then clear both cohort collectors. The task
    /// is awaited first so a finishing round cannot write stale samples.
    pub async fn stop_loop(&mut self) -> UmbraResult<()> {
        let task = self
            .task
            .take()
            .ok_or_else(|| UmbraError::State("training loop not running".to_string()))?;

        let _ = task.stop.send(true);
        let _ = task.handle.await;
        self.core.reset_collectors();

        Ok(())
    }
}

async fn training_loop(core: Arc<TrainerCore>, mut stop_rx: watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow() {
            return;
        }

        // A promotion changes the control group's probabilities; skip one
        // round so the comparison baseline is settled.
        if core.adjustment_period.swap(false, Ordering::SeqCst) {
            continue;
        }

        if let Err(err) = core.begin_round() {
            error!(%err, "could not install candidate rules; aborting training loop");
            return;
        }

        // Both cohorts fill with samples while we wait out the round.
        tokio::select! {
            _ = stop_rx.changed() => return,
            _ = tokio::time::sleep(core.round_wait) => {}
        }

        match core.finish_round() {
            Ok(promoted) => {
                debug!(promoted, "training round evaluated");
            }
            Err(err) => {
                error!(%err, "could not promote candidate rules; aborting training loop");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_trainer(round_wait: Duration) -> (Arc<PathProbabilities>, OnlineTrainer) {
        let live = Arc::new(PathProbabilities::new(1.0).unwrap());
        let paths: Vec<String> = ["/recommender", "/news", "/cart"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        for path in &paths {
            live.set(&PathProbabilityRule {
                path: path.clone(),
                probability: 0.5,
            })
            .unwrap();
        }
        let trainer = OnlineTrainer::new(Arc::clone(&live), paths, round_wait).unwrap();
        (live, trainer)
    }

    fn fill_round(core: &TrainerCore, control_centre: f64, candidate_centre: f64) {
        for i in 0..100 {
            let jitter = 0.0015 * i as f64;
            core.add_control_response_time(Duration::from_secs_f64(control_centre + jitter));
            core.add_candidate_response_time(Duration::from_secs_f64(candidate_centre + jitter));
        }
    }

    #[test]
    fn candidate_probabilities_start_as_live_copy() {
        let (_live, trainer) = seeded_trainer(Duration::from_secs(120));
        let core = trainer.core();
        for rule in core.candidate_rules() {
            assert_eq!(rule.probability, 0.5, "path {}", rule.path);
        }
    }

    #[test]
    fn begin_round_perturbs_exactly_one_path() {
        let (_live, trainer) = seeded_trainer(Duration::from_secs(120));
        let core = trainer.core();
        let rules = core.begin_round().unwrap();
        let changed = rules.iter().filter(|r| r.probability != 0.5).count();
        assert!(changed <= 1, "only one path may be perturbed per round");
        assert_eq!(rules.len(), 3);
        // Round-robin starts over from the first path.
        assert_eq!(rules[0].path, "/recommender");
    }

    #[test]
    fn round_robin_walks_the_path_list() {
        let (_live, trainer) = seeded_trainer(Duration::from_secs(120));
        let core = trainer.core();
        // Drive three rounds and observe the sampled index wrap around.
        for _ in 0..3 {
            core.begin_round().unwrap();
        }
        assert_eq!(*core.last_path_sampled.lock().unwrap(), 2);
        core.begin_round().unwrap();
        assert_eq!(*core.last_path_sampled.lock().unwrap(), 0);
    }

    #[test]
    fn clear_improvement_promotes_candidate_rules() {
        let (live, trainer) = seeded_trainer(Duration::from_secs(120));
        let core = trainer.core();
        core.begin_round().unwrap();
        fill_round(&core, 0.5, 0.3);

        assert!(core.finish_round().unwrap());
        assert_eq!(
            live.list_for_paths(&core.paths()),
            core.candidate_probabilities.list_for_paths(&core.paths()),
        );
        assert!(core.adjustment_period.load(Ordering::SeqCst));
    }

    #[test]
    fn thin_candidate_traffic_is_not_promoted() {
        let (_live, trainer) = seeded_trainer(Duration::from_secs(120));
        let core = trainer.core();
        core.begin_round().unwrap();
        // Candidate p95 stays under the 50ms floor.
        for _ in 0..100 {
            core.add_control_response_time(Duration::from_secs_f64(0.6));
            core.add_candidate_response_time(Duration::from_secs_f64(0.01));
        }
        assert!(!core.finish_round().unwrap());
    }

    #[test]
    fn marginal_improvement_is_not_promoted() {
        let (live, trainer) = seeded_trainer(Duration::from_secs(120));
        let core = trainer.core();
        core.begin_round().unwrap();
        // Only ~8% better than control: inside the 15% guard band.
        fill_round(&core, 0.5, 0.46);

        assert!(!core.finish_round().unwrap());
        for rule in live.list_for_paths(&core.paths()).values() {
            assert_eq!(*rule, 0.5);
        }
        assert!(!core.adjustment_period.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn loop_lifecycle_is_guarded() {
        let (_live, mut trainer) = seeded_trainer(Duration::from_millis(20));
        assert!(trainer.stop_loop().await.is_err());
        trainer.start_loop().unwrap();
        assert!(trainer.start_loop().is_err());
        trainer.stop_loop().await.unwrap();
        assert!(!trainer.is_running());
    }

    #[tokio::test]
    async fn running_loop_promotes_a_better_candidate() {
        let (live, mut trainer) = seeded_trainer(Duration::from_millis(20));
        let core = trainer.core();
        trainer.start_loop().unwrap();

        // Keep both cohorts fed while rounds run: control clearly slower.
        let feeder_core = Arc::clone(&core);
        let feeder = tokio::spawn(async move {
            loop {
                feeder_core.add_control_response_time(Duration::from_secs_f64(0.6));
                feeder_core.add_candidate_response_time(Duration::from_secs_f64(0.4));
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        // Every round promotes here, and each promotion copies a perturbed
        // probability into the live set, moving some path away from 0.5.
        let paths = core.paths();
        let mut promoted = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let moved = live
                .list_for_paths(&paths)
                .values()
                .any(|p| (p - 0.5).abs() > 1e-9);
            if moved {
                promoted = true;
                break;
            }
        }
        feeder.abort();
        trainer.stop_loop().await.unwrap();
        assert!(promoted, "live probabilities should adopt the candidate set");
    }
}
