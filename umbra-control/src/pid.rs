#![forbid(unsafe_code)]

//! Time-aware PID controller with low-pass input filtering, anti-windup and
//! output clamping. Time is read through the injected [`Clock`] so the
//! integral and differential terms can be driven deterministically in tests.

use std::sync::Arc;
use std::time::Instant;

use umbra_core::{Clock, UmbraError, UmbraResult};

const DEFAULT_LOW_PASS_POLE: f64 = 0.9;

/// Internal terms of the last computation, exposed for the control loop's
/// logging.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidSnapshot {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub err: f64,
}

pub struct PidController {
    clock: Arc<dyn Clock>,
    setpoint: f64,
    kp: f64,
    ki: f64,
    kd: f64,
    /// Output is clamped to [min_output, max_output] after every tick.
    min_output: f64,
    max_output: f64,
    /// Output will not change before this many seconds have elapsed.
    min_sample_secs: f64,
    /// Weight on the previous filtered input in the first-order smoothing.
    low_pass_pole: f64,
    last_output: f64,
    last_tick: Option<Instant>,
    last_input: f64,
    integral: f64,
    snapshot: PidSnapshot,
}

impl PidController {
    /// Gains must be non-negative; `reversed` flips all three so that a
    /// positive error (input below setpoint) reduces the control output.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        setpoint: f64,
        kp: f64,
        ki: f64,
        kd: f64,
        reversed: bool,
        min_output: f64,
        max_output: f64,
        min_sample_secs: f64,
    ) -> UmbraResult<Self> {
        if kp < 0.0 || ki < 0.0 || kd < 0.0 {
            return Err(UmbraError::Config(format!(
                "expected non-negative controller gains (toggle reversed instead); got kp = {kp}, ki = {ki}, kd = {kd}"
            )));
        }
        if min_output > max_output {
            return Err(UmbraError::Config(format!(
                "controller output clamp is inverted: [{min_output}, {max_output}]"
            )));
        }

        let (kp, ki, kd) = if reversed { (-kp, -ki, -kd) } else { (kp, ki, kd) };

        Ok(Self {
            clock,
            setpoint,
            kp,
            ki,
            kd,
            min_output,
            max_output,
            min_sample_secs,
            low_pass_pole: DEFAULT_LOW_PASS_POLE,
            last_output: 0.0,
            last_tick: None,
            last_input: 0.0,
            integral: 0.0,
            snapshot: PidSnapshot::default(),
        })
    }

    /// Feed the controller a new input and compute the next output.
    pub fn output(&mut self, input: f64) -> f64 {
        let now = self.clock.now();

        // Elapsed time is zero until a first loop has been made.
        let mut elapsed = 0.0;
        if let Some(last_tick) = self.last_tick {
            elapsed = (now - last_tick).as_secs_f64();
            if elapsed < self.min_sample_secs {
                // Hold the previous output until the minimum sample time has
                // passed; no state is mutated.
                return self.last_output;
            }
        }

        // Smooth the input through the low-pass pole.
        let input = self.low_pass_pole * self.last_input + (1.0 - self.low_pass_pole) * input;

        let err = self.setpoint - input;
        let p = self.kp * err;
        self.integral += self.ki * err * elapsed;

        // Differentiate on the input, not the error, to avoid derivative kick
        // on setpoint changes. Zero until a first loop has been made.
        let d = if elapsed != 0.0 {
            self.kd * -((input - self.last_input) / elapsed)
        } else {
            0.0
        };

        let output = (p + self.integral + d).clamp(self.min_output, self.max_output);

        // Anti-windup: rewrite the integral so it reproduces exactly the
        // clamped output's contribution and cannot diverge while saturated.
        self.integral = output - d - p;

        self.snapshot = PidSnapshot {
            p,
            i: self.integral,
            d,
            err,
        };
        self.last_tick = Some(now);
        self.last_input = input;
        self.last_output = output;

        output
    }

    /// Terms computed during the last `output` call.
    pub fn snapshot(&self) -> PidSnapshot {
        self.snapshot
    }

    pub fn reset(&mut self) {
        self.last_output = 0.0;
        self.last_tick = None;
        self.last_input = 0.0;
        self.integral = 0.0;
        self.snapshot = PidSnapshot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use umbra_core::ManualClock;

    fn manual_clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new())
    }

    /// Simple water boiler plant where heat dissipates slowly over time.
    struct WaterBoiler {
        temp: f64,
    }

    impl WaterBoiler {
        fn advance(&mut self, power: f64, seconds: f64) {
            if power > 0.0 {
                self.temp += 0.01 * power * seconds;
            }
            self.temp -= 0.2 * seconds;
        }
    }

    #[test]
    fn water_boiler_converges_to_setpoint() {
        let setpoint = 60.0;
        let clock = manual_clock();
        let mut controller = PidController::new(
            clock.clone(),
            setpoint,
            0.5,
            0.002,
            0.0,
            false,
            0.0,
            100.0,
            0.5,
        )
        .unwrap();

        let mut boiler = WaterBoiler { temp: 0.0 };
        let seconds_per_iteration = 10u64;
        for _ in 0..300 {
            let power = controller.output(boiler.temp);
            clock.advance_secs(seconds_per_iteration);
            boiler.advance(power, seconds_per_iteration as f64);
        }

        assert!(
            (boiler.temp - setpoint).abs() < 0.5,
            "expected temperature near {setpoint}; got {}",
            boiler.temp
        );
    }

    #[test]
    fn min_sample_time_is_exclusive() {
        let clock = manual_clock();
        let mut controller =
            PidController::new(clock.clone(), 50.0, 1.0, 0.0, 0.0, false, 0.0, 100.0, 1.0).unwrap();

        let initial = controller.output(10.0);
        // Elapsed equals the minimum sample time, so the loop must still run.
        clock.advance_secs(1);
        let next = controller.output(70.0);
        assert_ne!(initial, next);
    }

    #[test]
    fn holds_output_until_min_sample_time_elapses() {
        let clock = manual_clock();
        let mut controller =
            PidController::new(clock.clone(), 50.0, 1.0, 0.0, 0.0, false, 0.0, 100.0, 5.0).unwrap();

        let initial = controller.output(10.0);
        clock.advance_secs(3);
        let next = controller.output(70.0);
        assert!((next - initial).abs() < 1e-9);
        // The gate must not have mutated state: a further held call returns
        // the same output again.
        clock.advance_secs(1);
        assert!((controller.output(5.0) - initial).abs() < 1e-9);
    }

    #[test]
    fn reversed_controller_reacts_inversely() {
        let clock = manual_clock();
        let mut controller = PidController::new(
            clock.clone(),
            1000.0,
            2.0,
            3.0,
            4.0,
            true,
            f64::NEG_INFINITY,
            f64::INFINITY,
            1.0,
        )
        .unwrap();

        let initial = controller.output(1500.0);
        clock.advance_secs(3);
        let next = controller.output(950.0);
        assert!(
            initial > next,
            "expected initial output {initial} > next output {next}"
        );
    }

    #[test]
    fn reversed_mirrors_forward_output() {
        // With a symmetric clamp, flipping the gains negates every term of
        // the computation, so the reversed controller's output is exactly the
        // forward controller's output mirrored.
        let forward_clock = manual_clock();
        let reversed_clock = manual_clock();
        let mut forward =
            PidController::new(forward_clock.clone(), 2.0, 0.8, 0.1, 0.05, false, -50.0, 50.0, 0.0)
                .unwrap();
        let mut reversed =
            PidController::new(reversed_clock.clone(), 2.0, 0.8, 0.1, 0.05, true, -50.0, 50.0, 0.0)
                .unwrap();

        for input in [0.5, 1.5, 3.0, 2.0, 0.1, 4.2] {
            let a = forward.output(input);
            let b = reversed.output(input);
            assert!((a + b).abs() < 1e-9, "outputs {a} and {b} should mirror");
            forward_clock.advance(Duration::from_millis(1500));
            reversed_clock.advance(Duration::from_millis(1500));
        }
    }

    #[test]
    fn rejects_negative_gains() {
        let err = PidController::new(manual_clock(), 1.0, -1.0, 0.0, 0.0, false, 0.0, 1.0, 0.0);
        assert!(err.is_err());
    }

    #[test]
    fn reset_restores_initial_state() {
        let clock = manual_clock();
        let mut controller =
            PidController::new(clock.clone(), 10.0, 1.0, 0.5, 0.0, false, 0.0, 100.0, 0.0).unwrap();
        controller.output(4.0);
        clock.advance_secs(2);
        controller.output(6.0);

        controller.reset();
        assert_eq!(controller.snapshot(), PidSnapshot::default());
        assert_eq!(controller.last_output, 0.0);
        assert_eq!(controller.integral, 0.0);
        assert!(controller.last_tick.is_none());
    }

    proptest! {
        #[test]
        fn output_is_always_clamped(
            inputs in proptest::collection::vec(-1e6f64..1e6, 1..40),
            step_ms in 1u64..10_000,
        ) {
            let clock = manual_clock();
            let mut controller =
                PidController::new(clock.clone(), 3.0, 2.0, 0.2, 0.1, true, 0.0, 99.0, 0.0).unwrap();
            for input in inputs {
                let output = controller.output(input);
                prop_assert!((0.0..=99.0).contains(&output));
                clock.advance(Duration::from_millis(step_ms));
            }
        }
    }
}
