#![forbid(unsafe_code)]

//! The dimming control loop: a ticker task that aggregates recent response
//! times, drives the PID controller with the configured percentile and
//! publishes the resulting dimming percentage for the request handler.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use umbra_core::{UmbraError, UmbraResult};
use umbra_stats::{Collector, PercentileKey};

use crate::pid::PidController;

/// Shared state between the loop task and the request handler. The handler
/// reads the dimming percentage and feeds response times on every request;
/// only the loop task writes the percentage.
pub struct ControlLoopCore {
    pid: Mutex<PidController>,
    collector: Arc<dyn Collector>,
    percentile: PercentileKey,
    dimming_percentage: RwLock<f64>,
    period: Duration,
}

impl ControlLoopCore {
    /// Current output of the PID controller, between the controller's output
    /// bounds (0 and 99 in the default configuration).
    pub fn dimming_percentage(&self) -> f64 {
        *self
            .dimming_percentage
            .read()
            .expect("dimming percentage lock poisoned")
    }

    /// Feedback path from the request handler. Safe to call concurrently.
    pub fn add_response_time(&self, t: Duration) {
        self.collector.add(t);
    }

    fn tick(&self) {
        let aggregation = self.collector.aggregate();

        // The PID controller and logging operate in seconds.
        let p50 = aggregation.p50.as_secs_f64();
        let p75 = aggregation.p75.as_secs_f64();
        let p95 = aggregation.p95.as_secs_f64();

        let input = aggregation.percentile(self.percentile).as_secs_f64();
        let (output, snapshot) = {
            let mut pid = self.pid.lock().expect("pid lock poisoned");
            let output = pid.output(input);
            (output, pid.snapshot())
        };

        debug!(p50, p75, p95, "aggregate response times");
        debug!(
            output,
            p = snapshot.p,
            i = snapshot.i,
            d = snapshot.d,
            err = snapshot.err,
            "controller state"
        );

        let mut percentage = self
            .dimming_percentage
            .write()
            .expect("dimming percentage lock poisoned");
        *percentage = output;
    }

    fn reset(&self) {
        // Reset the collector before the controller so a stale aggregate can
        // never reach a freshly-reset PID, then zero the published output.
        self.collector.reset();
        self.pid.lock().expect("pid lock poisoned").reset();
        let mut percentage = self
            .dimming_percentage
            .write()
            .expect("dimming percentage lock poisoned");
        *percentage = 0.0;
    }
}

/// Owns the ticker task. Start, stop and reset are serialized by the caller
/// (the mode state machine); the hot-path state lives in [`ControlLoopCore`].
pub struct DimmingControlLoop {
    core: Arc<ControlLoopCore>,
    task: Option<LoopTask>,
}

struct LoopTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DimmingControlLoop {
    pub fn new(
        pid: PidController,
        collector: Arc<dyn Collector>,
        percentile: PercentileKey,
        period: Duration,
    ) -> Self {
        Self {
            core: Arc::new(ControlLoopCore {
                pid: Mutex::new(pid),
                collector,
                percentile,
                dimming_percentage: RwLock::new(0.0),
                period,
            }),
            task: None,
        }
    }

    /// Handle to the hot-path state, shared with the request handler.
    pub fn core(&self) -> Arc<ControlLoopCore> {
        Arc::clone(&self.core)
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn start(&mut self) -> UmbraResult<()> {
        if self.task.is_some() {
            return Err(UmbraError::State("control loop already started".to_string()));
        }

        let (stop, mut stop_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + core.period;
            let mut ticker = tokio::time::interval_at(start, core.period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => return,
                    _ = ticker.tick() => core.tick(),
                }
            }
        });

        self.task = Some(LoopTask { stop, handle });
        Ok(())
    }

    /// Stop the ticker task and clear all loop state. The task is awaited
    /// before anything is reset so that no tick from the old loop can write
    /// the dimming percentage afterwards.
    pub async fn stop(&mut self) -> UmbraResult<()> {
        let task = self
            .task
            .take()
            .ok_or_else(|| UmbraError::State("control loop not yet started".to_string()))?;

        let _ = task.stop.send(true);
        let _ = task.handle.await;
        self.core.reset();

        Ok(())
    }

    /// Stop and immediately restart with fresh state.
    pub async fn reset(&mut self) -> UmbraResult<()> {
        self.stop().await?;
        self.start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::SystemClock;
    use umbra_stats::WindowCollector;

    fn dimming_pid() -> PidController {
        // Reversed so that response times above the setpoint push the output
        // up, with the production clamp of [0, 99].
        PidController::new(
            Arc::new(SystemClock),
            0.1,
            2.0,
            0.2,
            0.0,
            true,
            0.0,
            99.0,
            0.0,
        )
        .unwrap()
    }

    fn fast_loop() -> DimmingControlLoop {
        DimmingControlLoop::new(
            dimming_pid(),
            Arc::new(WindowCollector::new(64)),
            PercentileKey::P95,
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut control_loop = fast_loop();
        control_loop.start().unwrap();
        assert!(control_loop.start().is_err());
        control_loop.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let mut control_loop = fast_loop();
        assert!(control_loop.stop().await.is_err());
    }

    #[tokio::test]
    async fn overloaded_backend_raises_dimming_percentage() {
        let mut control_loop = fast_loop();
        let core = control_loop.core();
        control_loop.start().unwrap();

        for _ in 0..32 {
            core.add_response_time(Duration::from_secs(2));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(
            core.dimming_percentage() > 0.0,
            "dimming percentage should rise above zero under load"
        );
        control_loop.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_clears_collector_pid_and_percentage() {
        let mut control_loop = fast_loop();
        let core = control_loop.core();
        control_loop.start().unwrap();

        for _ in 0..32 {
            core.add_response_time(Duration::from_secs(2));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        control_loop.stop().await.unwrap();

        assert_eq!(core.dimming_percentage(), 0.0);
        assert_eq!(core.collector.len(), 0);

        // A restarted loop begins from scratch.
        control_loop.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(core.dimming_percentage(), 0.0);
        control_loop.stop().await.unwrap();
    }

    #[tokio::test]
    async fn loop_reacts_to_the_configured_percentile_only() {
        // A short burst of 10s outliers dominates the p95 but not the p50,
        // so a p50-driven loop stays quiet while a p95-driven loop dims.
        let feed = |core: &Arc<ControlLoopCore>| {
            for _ in 0..30 {
                core.add_response_time(Duration::from_millis(10));
            }
            for _ in 0..5 {
                core.add_response_time(Duration::from_secs(10));
            }
        };

        let mut median_loop = DimmingControlLoop::new(
            dimming_pid(),
            Arc::new(WindowCollector::new(64)),
            PercentileKey::P50,
            Duration::from_millis(10),
        );
        let median_core = median_loop.core();
        median_loop.start().unwrap();
        feed(&median_core);

        let mut tail_loop = fast_loop();
        let tail_core = tail_loop.core();
        tail_loop.start().unwrap();
        feed(&tail_core);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(median_core.dimming_percentage(), 0.0);
        assert!(tail_core.dimming_percentage() > 0.0);

        median_loop.stop().await.unwrap();
        tail_loop.stop().await.unwrap();
    }

    #[tokio::test]
    async fn reset_restarts_the_loop() {
        let mut control_loop = fast_loop();
        control_loop.start().unwrap();
        control_loop.reset().await.unwrap();
        assert!(control_loop.is_running());
        control_loop.stop().await.unwrap();
        assert!(!control_loop.is_running());
    }
}
