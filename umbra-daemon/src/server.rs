#![forbid(unsafe_code)]

//! The dimming server: reverse-proxy data plane plus the mode state machine.
//!
//! Every request is classified against the request filter, rolled against
//! the control loop's dimming percentage and the per-path probabilities, and
//! either shed with `429 Too Many Requests` or forwarded to the backend. The
//! measured backend latency feeds the control loop (and, depending on mode,
//! the offline collector or an online-training cohort collector) so the loop
//! closes: slower backends are dimmed harder.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use http::header;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use umbra_control::{ControlLoopCore, DimmingControlLoop};
use umbra_core::{UmbraError, UmbraResult};
use umbra_filters::{PathProbabilities, PathProbabilityRule, RequestFilter};
use umbra_profiling::aggregator::DECAY_PERIOD;
use umbra_profiling::cookies as profiling_cookies;
use umbra_profiling::{Priority, Profiler};
use umbra_stats::Aggregation;
use umbra_training::cohort::ONLINE_TRAINING_COOKIE;
use umbra_training::{Cohort, OfflineTraining, OnlineTrainer, TrainerCore};

use crate::cookies;
use crate::mode::DimmingMode;
use crate::proxy::{full_body, Proxy, ProxyBody};

pub struct ServerOptions {
    pub proxy: Arc<dyn Proxy>,
    pub control_loop: DimmingControlLoop,
    pub request_filter: RequestFilter,
    pub path_probabilities: Arc<PathProbabilities>,
    pub online_trainer: OnlineTrainer,
    pub offline_training: OfflineTraining,
    pub profiler: Option<Arc<Profiler>>,
    pub profiling_session_cookie: String,
    pub dimming_enabled: bool,
}

/// Lifecycle state and loop owners, serialized behind one lock so mode
/// transitions and start/stop can never interleave.
struct Operations {
    started: bool,
    decay_task_spawned: bool,
    control: DimmingControlLoop,
    trainer: OnlineTrainer,
}

pub struct Server {
    proxy: Arc<dyn Proxy>,
    filter: RequestFilter,
    probabilities: Arc<PathProbabilities>,
    loop_core: Arc<ControlLoopCore>,
    trainer_core: Arc<TrainerCore>,
    offline: OfflineTraining,
    profiler: Option<Arc<Profiler>>,
    session_cookie: String,
    default_mode: DimmingMode,
    mode: RwLock<DimmingMode>,
    op: Mutex<Operations>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let default_mode = if options.dimming_enabled {
            DimmingMode::Dimming
        } else {
            DimmingMode::Disabled
        };

        Self {
            proxy: options.proxy,
            filter: options.request_filter,
            probabilities: options.path_probabilities,
            loop_core: options.control_loop.core(),
            trainer_core: options.online_trainer.core(),
            offline: options.offline_training,
            profiler: options.profiler,
            session_cookie: options.profiling_session_cookie,
            default_mode,
            mode: RwLock::new(default_mode),
            op: Mutex::new(Operations {
                started: false,
                decay_task_spawned: false,
                control: options.control_loop,
                trainer: options.online_trainer,
            }),
        }
    }

    pub fn mode(&self) -> DimmingMode {
        *self.mode.read().expect("mode lock poisoned")
    }

    /// The mode the server boots into, restored by the admin `Default` mode.
    pub fn default_mode(&self) -> DimmingMode {
        self.default_mode
    }

    /// Current output of the control loop, for observability.
    pub fn dimming_percentage(&self) -> f64 {
        self.loop_core.dimming_percentage()
    }

    /// Bind the frontend socket and start the control loop. Starting twice
    /// is an error; the returned listener is passed to [`Server::serve`].
    pub async fn start(&self, addr: SocketAddr) -> UmbraResult<TcpListener> {
        let mut op = self.op.lock().await;
        if op.started {
            return Err(UmbraError::State("server already started".to_string()));
        }

        let listener = TcpListener::bind(addr).await?;
        op.control.start()?;

        if let Some(profiler) = &self.profiler {
            if !op.decay_task_spawned {
                tokio::spawn(profiler.aggregator().run_decay(DECAY_PERIOD));
                op.decay_task_spawned = true;
            }
        }

        op.started = true;
        info!(addr = %listener.local_addr()?, "umbra proxy listening");
        Ok(listener)
    }

    /// Accept loop. Each connection is served on its own task.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> UmbraResult<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = Arc::clone(&self);
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let server = Arc::clone(&server);
                    async move {
                        let response = server.handle(req.map(|body| body.boxed())).await;
                        Ok::<_, std::convert::Infallible>(response)
                    }
                });
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(%err, peer = %peer, "connection closed with error");
                }
            });
        }
    }

    pub async fn listen_and_serve(self: Arc<Self>, addr: SocketAddr) -> UmbraResult<()> {
        let listener = self.start(addr).await?;
        self.serve(listener).await
    }

    /// Transition the dimming mode. Leaving online training stops the
    /// trainer; the offline collector and the control loop are reset on
    /// every transition; entering online training starts the trainer. Any
    /// failure aborts the transition with the previous mode intact.
    pub async fn set_mode(&self, new_mode: DimmingMode) -> UmbraResult<()> {
        let mut op = self.op.lock().await;
        if !op.started {
            return Err(UmbraError::State(
                "cannot set mode while the server is not running".to_string(),
            ));
        }

        if self.mode() == DimmingMode::DimmingWithOnlineTraining {
            op.trainer.stop_loop().await?;
        }

        self.offline.reset_collector();
        op.control.reset().await?;

        if new_mode == DimmingMode::DimmingWithOnlineTraining {
            op.trainer.start_loop()?;
        }

        *self.mode.write().expect("mode lock poisoned") = new_mode;
        info!(mode = %new_mode, "dimming mode set");
        Ok(())
    }

    /// Replace per-path probabilities. Propagates to both the live map and
    /// the online trainer's path list, which tracks the configured paths.
    pub fn update_path_probabilities(&self, rules: &[PathProbabilityRule]) -> UmbraResult<()> {
        self.probabilities.set_all(rules)?;
        let paths = rules.iter().map(|rule| rule.path.clone()).collect();
        self.trainer_core.set_paths(paths);
        Ok(())
    }

    pub fn list_path_probabilities(&self) -> HashMap<String, f64> {
        self.probabilities.list()
    }

    pub fn clear_path_probabilities(&self) {
        self.probabilities.clear();
    }

    /// Offline-training aggregation, read by operators between load runs.
    pub fn offline_training_metrics(&self) -> Aggregation {
        self.offline.response_time_metrics()
    }

    /// The request handler. Classify, decide, shed or forward, feed the
    /// measured latency back, and issue any session cookies.
    pub async fn handle(&self, mut req: Request<ProxyBody>) -> Response<ProxyBody> {
        let mode = self.mode();
        let ctx = RequestContext::read_from(&req, &self.session_cookie);
        let mut issued_cookies: Vec<String> = Vec::new();

        let is_dimmable = mode != DimmingMode::Disabled
            && self.filter.matches(&ctx.path, &ctx.method, &ctx.referer);

        if is_dimmable && self.should_dim(mode, &ctx, &mut issued_cookies) {
            let mut response = Response::new(full_body("Dimming!"));
            *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
            for cookie in &issued_cookies {
                cookies::append_set_cookie(response.headers_mut(), cookie);
            }
            return response;
        }

        // Remove the connection header per RFC 2616.
        req.headers_mut().remove(header::CONNECTION);

        let start = Instant::now();
        let result = self.proxy.forward(req).await;
        let duration = start.elapsed();

        let mut response = match result {
            Ok(response) => response,
            Err(err) => {
                error!(%err, path = %ctx.path, "error proxying request");
                let mut response = Response::new(full_body(err.to_string()));
                *response.status_mut() = StatusCode::BAD_GATEWAY;
                response
            }
        };

        // Static .html pages are cache-friendly and would bias the latency
        // signal, so they are excluded from feedback. Proxy failures are
        // included: a chronically failing backend must raise the dimming
        // percentage.
        if !ctx.path.contains(".html") {
            debug!(
                seconds = duration.as_secs_f64(),
                path = %ctx.path,
                "backend response time"
            );
            self.loop_core.add_response_time(duration);

            if mode == DimmingMode::OfflineTraining {
                self.offline.add_response_time(duration);
            }

            if mode == DimmingMode::DimmingWithOnlineTraining {
                match ctx.cohort {
                    Some(Cohort::Candidate) => self.trainer_core.add_candidate_response_time(duration),
                    Some(Cohort::Control) => self.trainer_core.add_control_response_time(duration),
                    None => {}
                }
            }
        }

        if mode == DimmingMode::DimmingWithProfiling {
            if let (Some(profiler), Some(session_id)) = (&self.profiler, &ctx.session_id) {
                profiler.requests.write(session_id, &ctx.method, &ctx.path);

                if ctx.path.contains(".html") && ctx.priority.is_none() {
                    let priority = profiler.priorities.fetch(session_id).await;
                    issued_cookies.push(profiling_cookies::priority_set_cookie(priority));
                    if priority == Priority::Unknown {
                        // Ask the backend to profile the session; the result
                        // arrives through a later fetch.
                        profiler.priorities.profile(session_id).await;
                    }
                }
            }
        }

        // Cohorts are sampled on .html requests only, so a single page visit
        // cannot re-roll the assignment across every sub-resource.
        if mode == DimmingMode::DimmingWithOnlineTraining
            && ctx.path.contains(".html")
            && ctx.cohort.is_none()
        {
            let cohort = Cohort::sample(&mut rand::thread_rng());
            issued_cookies.push(cohort.set_cookie());
        }

        for cookie in &issued_cookies {
            cookies::append_set_cookie(response.headers_mut(), cookie);
        }
        // Remove the connection header per RFC 2616.
        response.headers_mut().remove(header::CONNECTION);

        response
    }

    fn should_dim(
        &self,
        mode: DimmingMode,
        ctx: &RequestContext,
        issued_cookies: &mut Vec<String>,
    ) -> bool {
        // Offline training always sheds filtered paths; otherwise roll
        // against the control loop's current output.
        let mut should_dim = mode == DimmingMode::OfflineTraining
            || rand::thread_rng().gen::<f64>() * 100.0 < self.loop_core.dimming_percentage();

        // Sessions dimmed by priority have every optional component shed
        // uniformly, irrespective of path probabilities.
        let mut skip_path_probabilities = false;

        if mode == DimmingMode::DimmingWithProfiling && ctx.session_id.is_some() {
            if let Some(profiler) = &self.profiler {
                if let Some(decision) = ctx.dimming_decision {
                    // The session already has a sticky verdict; reuse it.
                    skip_path_probabilities = true;
                    should_dim = decision;
                } else if let Some(priority) = ctx.priority.filter(|p| p.is_known()) {
                    profiler.record_visit(priority);

                    // Roll a long-term decision for the session. The fresh
                    // decision alone never sheds this request: it can only
                    // be true when the baseline roll already dims, and the
                    // shed response still carries the Set-Cookie header.
                    let decision = should_dim && profiler.sample_should_dim(priority);
                    issued_cookies.push(profiling_cookies::dimming_decision_set_cookie(decision));
                    skip_path_probabilities = decision;
                    should_dim = should_dim || decision;
                }
            }
        }

        if !skip_path_probabilities {
            // Weight the shed by path probability; candidate-cohort users
            // roll against the experimental set instead.
            let use_candidate = mode == DimmingMode::DimmingWithOnlineTraining
                && ctx.cohort == Some(Cohort::Candidate);
            should_dim = should_dim
                && if use_candidate {
                    self.trainer_core.sample_candidate_should_dim(&ctx.path)
                } else {
                    self.probabilities.sample_should_dim(&ctx.path)
                };
        }

        should_dim
    }
}

/// Everything the shed decision and feedback steps need from the request,
/// extracted up front because the request itself is consumed by the proxy.
struct RequestContext {
    method: String,
    path: String,
    referer: String,
    session_id: Option<String>,
    priority: Option<Priority>,
    dimming_decision: Option<bool>,
    cohort: Option<Cohort>,
}

impl RequestContext {
    fn read_from<B>(req: &Request<B>, session_cookie: &str) -> Self {
        let headers = req.headers();
        let referer = headers
            .get(header::REFERER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        let session_id = cookies::cookie_value(headers, session_cookie)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let priority = cookies::cookie_value(headers, profiling_cookies::PRIORITY_COOKIE)
            .and_then(profiling_cookies::parse_priority);
        let dimming_decision =
            cookies::cookie_value(headers, profiling_cookies::DIMMING_DECISION_COOKIE)
                .map(profiling_cookies::parse_dimming_decision);
        let cohort = cookies::cookie_value(headers, ONLINE_TRAINING_COOKIE)
            .map(Cohort::from_cookie_value);

        Self {
            method: req.method().as_str().to_string(),
            path: req.uri().path().to_string(),
            referer,
            session_id,
            priority,
            dimming_decision,
            cohort,
        }
    }
}
