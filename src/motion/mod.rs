// src/motion/mod.rs - Kinematics, pulse generation, pen, queue, scheduler
pub mod kinematics;
pub mod pen;
pub mod pulse;
pub mod queue;
pub mod scheduler;

pub use kinematics::{Geometry, KinematicsError, StringLengths};
pub use pen::PenActuator;
pub use pulse::PulseEngine;
pub use queue::{JobQueue, QueuedPoint, Target};
pub use scheduler::Scheduler;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("Move cancelled")]
    Cancelled,
    #[error("Step delta {delta} exceeds the supported range")]
    DeltaOverflow { delta: i64 },
    #[error("Queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("Kinematics error: {0}")]
    Kinematics(#[from] KinematicsError),
}

/// Resolve the step rate for a move. Zero means "use the default"; the
/// result is clamped into `[1, max]`, and pen-up travel moves are floored at
/// the travel speed so repositioning stays fast.
pub fn effective_speed(speeds: &crate::config::SpeedConfig, requested: u32, pen_down: bool) -> u32 {
    let mut speed = if requested == 0 {
        speeds.default_sps
    } else {
        requested
    };
    speed = speed.clamp(1, speeds.max_sps);
    if !pen_down {
        speed = speed.max(speeds.travel_sps).min(speeds.max_sps);
    }
    speed
}
