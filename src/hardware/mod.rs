// src/hardware/mod.rs - Driver traits and the simulated bench implementations
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// One stepper driver channel (step pin, direction pin, enable pin).
///
/// `pulse()` emits a single rising edge and holds it for the driver's
/// minimum pulse width. Direction polarity is the implementation's concern;
/// callers always pass `forward = true` for a lengthening string.
pub trait StepDriver: Send {
    fn set_direction(&mut self, forward: bool);
    fn pulse(&mut self);
    fn set_enabled(&mut self, enabled: bool);
}

/// Single-channel hobby servo holding the pen lifter.
pub trait PenServo: Send {
    fn write_angle(&mut self, degrees: f64);
}

/// Identifies one of the two motors on the wire and in the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorId {
    Left,
    Right,
}

impl MotorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            MotorId::Left => "left",
            MotorId::Right => "right",
        }
    }

    pub fn parse(value: &str) -> Option<MotorId> {
        match value {
            "left" => Some(MotorId::Left),
            "right" => Some(MotorId::Right),
            _ => None,
        }
    }
}

/// Both stepper channels. The motion worker locks the bank for the duration
/// of a move; the jog endpoint locks it for a single-motor test.
pub struct MotorBank {
    pub left: Box<dyn StepDriver>,
    pub right: Box<dyn StepDriver>,
}

impl MotorBank {
    pub fn new(left: Box<dyn StepDriver>, right: Box<dyn StepDriver>) -> Self {
        Self { left, right }
    }

    pub fn driver_mut(&mut self, id: MotorId) -> &mut dyn StepDriver {
        match id {
            MotorId::Left => self.left.as_mut(),
            MotorId::Right => self.right.as_mut(),
        }
    }

    pub fn disable_all(&mut self) {
        self.left.set_enabled(false);
        self.right.set_enabled(false);
    }
}

/// Observable counters exposed by [`SimStepDriver`], for tests and for
/// running without hardware.
#[derive(Debug, Default)]
pub struct SimMotorProbe {
    pulses: AtomicI64,
    position: AtomicI64,
    enabled: AtomicBool,
}

impl SimMotorProbe {
    pub fn pulses(&self) -> i64 {
        self.pulses.load(Ordering::SeqCst)
    }

    /// Signed step position: pulses while forward minus pulses while
    /// reverse.
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::SeqCst)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Stepper driver simulation for running the controller without hardware.
/// Tracks pulse counts and the signed position through a shared probe.
pub struct SimStepDriver {
    label: &'static str,
    invert_dir: bool,
    forward: bool,
    probe: Arc<SimMotorProbe>,
}

impl SimStepDriver {
    pub fn new(label: &'static str, invert_dir: bool) -> (Self, Arc<SimMotorProbe>) {
        let probe = Arc::new(SimMotorProbe::default());
        let driver = Self {
            label,
            invert_dir,
            forward: true,
            probe: probe.clone(),
        };
        (driver, probe)
    }
}

impl StepDriver for SimStepDriver {
    fn set_direction(&mut self, forward: bool) {
        // The xor models the hardware polarity switch; the logical direction
        // recorded by the probe is unaffected.
        let _pin_level = forward ^ self.invert_dir;
        self.forward = forward;
    }

    fn pulse(&mut self) {
        self.probe.pulses.fetch_add(1, Ordering::SeqCst);
        let delta = if self.forward { 1 } else { -1 };
        self.probe.position.fetch_add(delta, Ordering::SeqCst);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.probe.enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!(
            "motor {} outputs {}",
            self.label,
            if enabled { "enabled" } else { "disabled" }
        );
    }
}

/// Pen servo simulation; records the last written angle and a write count.
#[derive(Debug, Default)]
pub struct SimServoProbe {
    writes: AtomicI64,
    angle_centi_deg: AtomicI64,
}

impl SimServoProbe {
    pub fn writes(&self) -> i64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn angle(&self) -> f64 {
        self.angle_centi_deg.load(Ordering::SeqCst) as f64 / 100.0
    }
}

pub struct SimPenServo {
    probe: Arc<SimServoProbe>,
}

impl SimPenServo {
    pub fn new() -> (Self, Arc<SimServoProbe>) {
        let probe = Arc::new(SimServoProbe::default());
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl PenServo for SimPenServo {
    fn write_angle(&mut self, degrees: f64) {
        self.probe.writes.fetch_add(1, Ordering::SeqCst);
        self.probe
            .angle_centi_deg
            .store((degrees * 100.0).round() as i64, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_driver_counts_signed_position() {
        let (mut driver, probe) = SimStepDriver::new("left", false);
        driver.set_direction(true);
        driver.pulse();
        driver.pulse();
        driver.set_direction(false);
        driver.pulse();
        assert_eq!(probe.pulses(), 3);
        assert_eq!(probe.position(), 1);
    }

    #[test]
    fn test_sim_servo_records_angle() {
        let (mut servo, probe) = SimPenServo::new();
        servo.write_angle(40.0);
        servo.write_angle(90.0);
        assert_eq!(probe.writes(), 2);
        assert!((probe.angle() - 90.0).abs() < 1e-9);
    }
}
