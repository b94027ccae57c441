// src/state.rs - Authoritative physical pose of the machine
use crate::motion::kinematics::StringLengths;

/// Authoritative pose of the plotter. Step counters are the integer truth of
/// what the motors have done; lengths and the (x, y) position are derived
/// and kept consistent after every successful move.
#[derive(Debug, Clone)]
pub struct MachineState {
    pub x_mm: f64,
    pub y_mm: f64,
    pub left_len_mm: f64,
    pub right_len_mm: f64,
    pub left_steps: i64,
    pub right_steps: i64,
    pub pen_down: bool,
    /// False until an explicit start position has been accepted.
    pub initialized: bool,
}

impl MachineState {
    pub fn new() -> Self {
        Self {
            x_mm: 0.0,
            y_mm: 0.0,
            left_len_mm: 0.0,
            right_len_mm: 0.0,
            left_steps: 0,
            right_steps: 0,
            pen_down: false,
            initialized: false,
        }
    }

    /// Synchronize the internal counters with a declared physical pose.
    /// Does not move anything.
    pub fn sync_to(
        &mut self,
        x_mm: f64,
        y_mm: f64,
        lengths: StringLengths,
        left_steps: i64,
        right_steps: i64,
        pen_down: bool,
    ) {
        self.x_mm = x_mm;
        self.y_mm = y_mm;
        self.left_len_mm = lengths.left;
        self.right_len_mm = lengths.right;
        self.left_steps = left_steps;
        self.right_steps = right_steps;
        self.pen_down = pen_down;
        self.initialized = true;
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}
