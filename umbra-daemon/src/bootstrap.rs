#![forbid(unsafe_code)]

//! Wiring from configuration to a ready-to-start [`Server`].

use std::sync::Arc;
use std::time::Duration;

use umbra_control::{DimmingControlLoop, PidController};
use umbra_core::config::UmbraConfig;
use umbra_core::{SystemClock, UmbraResult};
use umbra_filters::request_filter::ALL_METHODS;
use umbra_filters::{PathProbabilities, PathProbabilityRule, RequestFilter};
use umbra_profiling::{
    DimmingProbabilities, PriorityVisitAggregator, Profiler, StaticPriorityFetcher,
    TracingRequestWriter,
};
use umbra_stats::{PercentileKey, WindowCollector};
use umbra_training::{OfflineTraining, OnlineTrainer};

use crate::proxy::{HttpProxy, Proxy};
use crate::server::{Server, ServerOptions};

/// Shed probability applied to configured paths that don't specify one.
const DEFAULT_PATH_PROBABILITY: f64 = 1.0;

/// Output bounds of the PID controller. The maximum is 99 rather than 100 so
/// that a trickle of sampled requests reaches the backend even at full
/// dimming, letting the loop detect recovery.
const MIN_DIMMING_PERCENTAGE: f64 = 0.0;
const MAX_DIMMING_PERCENTAGE: f64 = 99.0;

/// Length of one online-training A/B round.
const TRAINING_ROUND_WAIT: Duration = Duration::from_secs(2 * 60);

pub fn build_server(config: &UmbraConfig) -> UmbraResult<Arc<Server>> {
    let proxy = Arc::new(HttpProxy::new(
        &config.proxying.backend_host,
        config.proxying.backend_port,
        config.proxying.max_conns,
    ));
    build_server_with_proxy(config, proxy)
}

/// Build the server around an arbitrary proxy transport.
pub fn build_server_with_proxy(
    config: &UmbraConfig,
    proxy: Arc<dyn Proxy>,
) -> UmbraResult<Arc<Server>> {
    config.validate()?;
    let controller = &config.dimming.controller;

    // Reversed: a response time above the setpoint must push the dimming
    // percentage up.
    let pid = PidController::new(
        Arc::new(SystemClock),
        controller.setpoint,
        controller.kp,
        controller.ki,
        controller.kd,
        true,
        MIN_DIMMING_PERCENTAGE,
        MAX_DIMMING_PERCENTAGE,
        controller.sample_period,
    )?;

    let percentile: PercentileKey = controller.percentile.parse()?;
    let collector = Arc::new(WindowCollector::new(controller.window));
    let control_loop = DimmingControlLoop::new(
        pid,
        collector,
        percentile,
        Duration::from_secs_f64(controller.sample_period),
    );

    let mut filter = RequestFilter::new();
    let probabilities = Arc::new(PathProbabilities::new(DEFAULT_PATH_PROBABILITY)?);
    let mut paths = Vec::new();

    for component in &config.dimming.dimmable_paths {
        let methods: Vec<&str> = if component.match_all_methods {
            ALL_METHODS.to_vec()
        } else {
            component.method.iter().map(String::as_str).collect()
        };

        for method in &methods {
            filter.add(&component.path, method);
        }
        for exclusion in &component.exclusions {
            for method in &methods {
                filter.add_referer_exclusion(&component.path, method, &exclusion.substring)?;
            }
        }

        if let Some(probability) = component.probability {
            probabilities.set(&PathProbabilityRule {
                path: component.path.clone(),
                probability,
            })?;
        }
        paths.push(component.path.clone());
    }

    let online_trainer =
        OnlineTrainer::new(Arc::clone(&probabilities), paths, TRAINING_ROUND_WAIT)?;

    let profiler_config = &config.dimming.profiler;
    let profiler = if profiler_config.enabled {
        Some(Arc::new(Profiler::new(
            Arc::new(StaticPriorityFetcher::new()),
            Arc::new(TracingRequestWriter),
            Arc::new(PriorityVisitAggregator::new()),
            DimmingProbabilities {
                low: profiler_config.probabilities.low,
                high: profiler_config.probabilities.high,
                low_multiplier: profiler_config.probabilities.low_multiplier,
                high_multiplier: profiler_config.probabilities.high_multiplier,
            },
        )?))
    } else {
        None
    };

    Ok(Arc::new(Server::new(ServerOptions {
        proxy,
        control_loop,
        request_filter: filter,
        path_probabilities: probabilities,
        online_trainer,
        offline_training: OfflineTraining::new(),
        profiler,
        profiling_session_cookie: profiler_config.session_cookie.clone(),
        dimming_enabled: config.dimming.enabled,
    })))
}
