// src/motion/kinematics.rs - Polargraph string geometry
use crate::config::{BoardConfig, Config, MotorsConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KinematicsError {
    #[error("Point ({x}, {y}) is outside the reachable region")]
    OutOfRange { x: f64, y: f64 },
    #[error("Coordinates are not finite")]
    NonFinite,
    #[error("String lengths ({left}, {right}) have no valid pen position")]
    Unsolvable { left: f64, right: f64 },
}

/// Left and right string lengths from the motor anchors to the corresponding
/// gondola attachment points, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StringLengths {
    pub left: f64,
    pub right: f64,
}

/// Pure kinematic model of the plotter. The two motors hang
/// `motor_offset_mm` above the top edge of the board; the gondola attaches
/// its strings `pen_offset_mm` either side of the pen tip.
#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    width_mm: f64,
    pen_offset_mm: f64,
    motor_offset_mm: f64,
    steps_per_mm: f64,
}

impl Geometry {
    pub fn new(board: &BoardConfig, motors: &MotorsConfig) -> Self {
        Self {
            width_mm: board.width_mm,
            pen_offset_mm: board.pen_offset_mm,
            motor_offset_mm: board.motor_offset_mm,
            steps_per_mm: motors.steps_per_mm(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.board, &config.motors)
    }

    pub fn steps_per_mm(&self) -> f64 {
        self.steps_per_mm
    }

    /// Inverse kinematics: pen position to string lengths.
    ///
    /// The left attachment sits at `x - d`, the right at `x + d`, and both
    /// motors are `h` above the board, so the triangles are measured against
    /// `y + h`.
    pub fn string_lengths(&self, x: f64, y: f64) -> Result<StringLengths, KinematicsError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(KinematicsError::NonFinite);
        }
        if x < 0.0 || y < 0.0 {
            return Err(KinematicsError::OutOfRange { x, y });
        }

        let d = self.pen_offset_mm;
        let y_rel = y + self.motor_offset_mm;

        let left_x = x - d;
        let right_dx = self.width_mm - (x + d);

        let left = (left_x * left_x + y_rel * y_rel).sqrt();
        let right = (right_dx * right_dx + y_rel * y_rel).sqrt();

        if !left.is_finite() || !right.is_finite() {
            return Err(KinematicsError::OutOfRange { x, y });
        }

        Ok(StringLengths { left, right })
    }

    /// Forward kinematics: string lengths back to the pen position. Used for
    /// status reporting; the motion path works in lengths directly.
    pub fn position(&self, lengths: StringLengths) -> Result<(f64, f64), KinematicsError> {
        let StringLengths { left, right } = lengths;
        if !left.is_finite() || !right.is_finite() {
            return Err(KinematicsError::Unsolvable { left, right });
        }

        let d = self.pen_offset_mm;
        let w = self.width_mm - d;
        let denom = 2.0 * (d - w);
        if denom.abs() < 1e-9 {
            return Err(KinematicsError::Unsolvable { left, right });
        }

        let x = (right * right - left * left + d * d - w * w) / denom;
        let radicand = left * left - (x - d) * (x - d);
        if radicand < 0.0 {
            return Err(KinematicsError::Unsolvable { left, right });
        }

        let y = radicand.sqrt() - self.motor_offset_mm;
        Ok((x, y))
    }

    /// Cumulative step count equivalent to a string length.
    pub fn steps_for_length(&self, length_mm: f64) -> i64 {
        (length_mm * self.steps_per_mm).round() as i64
    }

    /// String length equivalent to a cumulative step count.
    pub fn length_for_steps(&self, steps: i64) -> f64 {
        steps as f64 / self.steps_per_mm
    }
}
