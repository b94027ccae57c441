// src/motion/pulse.rs - Synchronized dual-stepper pulse generation
use crate::hardware::{MotorBank, StepDriver};
use crate::motion::MotionError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Emits interleaved step pulses on both motors so that a move of signed
/// deltas `(delta_left, delta_right)` finishes on both axes simultaneously.
///
/// This is Bresenham's line algorithm in step space: over
/// `n = max(|dl|, |dr|)` iterations each axis accumulates its own magnitude
/// and fires whenever the accumulator crosses `n`, which distributes both
/// pulse trains uniformly along the move.
#[derive(Debug, Clone, Copy)]
pub struct PulseEngine {
    min_pulse_us: u64,
    yield_every: u32,
}

impl PulseEngine {
    pub fn new(min_pulse_us: u64) -> Self {
        Self {
            min_pulse_us,
            yield_every: 100,
        }
    }

    /// Step period for a target rate, floored so the step pin's duty cycle
    /// stays within the driver's minimum pulse width.
    pub fn step_delay(&self, speed_sps: u32) -> Duration {
        let speed = speed_sps.max(1) as u64;
        let delay_us = (1_000_000 / speed).max(4 * self.min_pulse_us);
        Duration::from_micros(delay_us)
    }

    /// Drive both motors through one coordinated move. Blocks the calling
    /// thread for the duration; polls `cancel` every iteration and aborts
    /// with outputs disabled when it is set.
    pub fn run(
        &self,
        motors: &mut MotorBank,
        delta_left: i64,
        delta_right: i64,
        speed_sps: u32,
        cancel: &AtomicBool,
    ) -> Result<(), MotionError> {
        if delta_left == 0 && delta_right == 0 {
            return Ok(());
        }
        if delta_left.unsigned_abs() > i32::MAX as u64 {
            return Err(MotionError::DeltaOverflow { delta: delta_left });
        }
        if delta_right.unsigned_abs() > i32::MAX as u64 {
            return Err(MotionError::DeltaOverflow { delta: delta_right });
        }

        let n_left = delta_left.unsigned_abs();
        let n_right = delta_right.unsigned_abs();
        let n = n_left.max(n_right);
        let delay = self.step_delay(speed_sps);

        motors.left.set_direction(delta_left >= 0);
        motors.right.set_direction(delta_right >= 0);
        motors.left.set_enabled(true);
        motors.right.set_enabled(true);

        let mut acc_left: u64 = 0;
        let mut acc_right: u64 = 0;

        for i in 0..n {
            if cancel.load(Ordering::SeqCst) {
                motors.disable_all();
                return Err(MotionError::Cancelled);
            }

            acc_left += n_left;
            if acc_left >= n {
                acc_left -= n;
                motors.left.pulse();
            }
            acc_right += n_right;
            if acc_right >= n {
                acc_right -= n;
                motors.right.pulse();
            }

            std::thread::sleep(delay);

            if (i + 1) % self.yield_every as u64 == 0 {
                std::thread::yield_now();
            }
        }

        Ok(())
    }

    /// Single-motor variant backing the diagnostic jog endpoint.
    pub fn run_single(
        &self,
        driver: &mut dyn StepDriver,
        delta: i64,
        speed_sps: u32,
        cancel: &AtomicBool,
    ) -> Result<(), MotionError> {
        if delta == 0 {
            return Ok(());
        }
        if delta.unsigned_abs() > i32::MAX as u64 {
            return Err(MotionError::DeltaOverflow { delta });
        }

        let delay = self.step_delay(speed_sps);
        driver.set_direction(delta >= 0);
        driver.set_enabled(true);

        for i in 0..delta.unsigned_abs() {
            if cancel.load(Ordering::SeqCst) {
                driver.set_enabled(false);
                return Err(MotionError::Cancelled);
            }
            driver.pulse();
            std::thread::sleep(delay);
            if (i + 1) % self.yield_every as u64 == 0 {
                std::thread::yield_now();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimStepDriver;

    fn bank() -> (MotorBank, std::sync::Arc<crate::hardware::SimMotorProbe>, std::sync::Arc<crate::hardware::SimMotorProbe>) {
        let (left, left_probe) = SimStepDriver::new("left", false);
        let (right, right_probe) = SimStepDriver::new("right", false);
        (
            MotorBank::new(Box::new(left), Box::new(right)),
            left_probe,
            right_probe,
        )
    }

    #[test]
    fn test_zero_deltas_emit_nothing() {
        let engine = PulseEngine::new(2);
        let (mut motors, left, right) = bank();
        let cancel = AtomicBool::new(false);
        engine.run(&mut motors, 0, 0, 6000, &cancel).unwrap();
        assert_eq!(left.pulses(), 0);
        assert_eq!(right.pulses(), 0);
    }

    #[test]
    fn test_exact_pulse_counts() {
        let engine = PulseEngine::new(2);
        let (mut motors, left, right) = bank();
        let cancel = AtomicBool::new(false);
        engine.run(&mut motors, 250, -90, 100_000, &cancel).unwrap();
        assert_eq!(left.pulses(), 250);
        assert_eq!(right.pulses(), 90);
        assert_eq!(left.position(), 250);
        assert_eq!(right.position(), -90);
    }

    #[test]
    fn test_overflow_rejected() {
        let engine = PulseEngine::new(2);
        let (mut motors, _, _) = bank();
        let cancel = AtomicBool::new(false);
        let result = engine.run(&mut motors, i64::from(i32::MAX) + 1, 0, 1000, &cancel);
        assert!(matches!(result, Err(MotionError::DeltaOverflow { .. })));
    }

    #[test]
    fn test_step_delay_floor() {
        let engine = PulseEngine::new(2);
        // 1_000_000 / 500_000 = 2us, below the 8us floor.
        assert_eq!(engine.step_delay(500_000), Duration::from_micros(8));
        assert_eq!(engine.step_delay(1000), Duration::from_micros(1000));
    }

    #[test]
    fn test_cancel_aborts_and_disables() {
        let engine = PulseEngine::new(2);
        let (mut motors, left, _) = bank();
        let cancel = AtomicBool::new(true);
        let result = engine.run(&mut motors, 1000, 1000, 100_000, &cancel);
        assert!(matches!(result, Err(MotionError::Cancelled)));
        assert_eq!(left.pulses(), 0);
        assert!(!left.enabled());
    }
}
