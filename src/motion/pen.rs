// src/motion/pen.rs - Pen lift state machine
use crate::config::PenConfig;
use crate::hardware::PenServo;
use std::time::Duration;

/// Debounced pen actuator. Commands targeting the already-cached state are
/// no-ops and skip the settle delay; real transitions write the servo and
/// block until it has settled.
pub struct PenActuator {
    servo: Box<dyn PenServo>,
    up_angle: f64,
    down_angle: f64,
    settle: Duration,
    /// None until the first command; the servo position is unknown at boot.
    state: Option<bool>,
}

impl PenActuator {
    pub fn new(servo: Box<dyn PenServo>, config: &PenConfig) -> Self {
        Self {
            servo,
            up_angle: config.up_angle,
            down_angle: config.down_angle,
            settle: Duration::from_millis(config.settle_ms),
            state: None,
        }
    }

    pub fn is_down(&self) -> bool {
        self.state.unwrap_or(false)
    }

    /// Drive the pen to the requested state. Returns true when the servo was
    /// actually written.
    pub fn set_down(&mut self, down: bool) -> bool {
        if self.state == Some(down) {
            return false;
        }
        let angle = if down { self.down_angle } else { self.up_angle };
        self.servo.write_angle(angle);
        std::thread::sleep(self.settle);
        self.state = Some(down);
        true
    }

    /// Lift the pen; used by cancel paths.
    pub fn lift(&mut self) -> bool {
        self.set_down(false)
    }
}
