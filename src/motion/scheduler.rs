// src/motion/scheduler.rs - The motion worker loop
use crate::config::SpeedConfig;
use crate::controller::Shared;
use crate::hardware::MotorBank;
use crate::motion::{
    effective_speed, Geometry, MotionError, PenActuator, PulseEngine, QueuedPoint, StringLengths,
    Target,
};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Single motion worker. Pops one queued point at a time, drives the pulse
/// engine to reach it, and commits the new pose atomically. Runs on its own
/// OS thread; neither the queue lock nor the state lock is held while
/// pulses are being emitted.
pub struct Scheduler {
    shared: Arc<Shared>,
    motors: Arc<Mutex<MotorBank>>,
    pen: Arc<Mutex<PenActuator>>,
    engine: PulseEngine,
    geometry: Geometry,
    speeds: SpeedConfig,
    idle_sleep: Duration,
}

impl Scheduler {
    pub fn new(
        shared: Arc<Shared>,
        motors: Arc<Mutex<MotorBank>>,
        pen: Arc<Mutex<PenActuator>>,
        engine: PulseEngine,
        geometry: Geometry,
        speeds: SpeedConfig,
    ) -> Self {
        Self {
            shared,
            motors,
            pen,
            engine,
            geometry,
            speeds,
            idle_sleep: Duration::from_millis(10),
        }
    }

    pub fn run(self) {
        tracing::info!("Motion worker started");
        loop {
            if self.shared.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let point = {
                let mut queue = self.shared.queue.lock().unwrap();
                if queue.executing && !queue.is_empty() {
                    queue.pop_front()
                } else {
                    if queue.executing && queue.is_empty() && queue.end_of_job {
                        queue.executing = false;
                        queue.end_of_job = false;
                        tracing::info!("Queue drained with end-of-job set; job complete");
                    }
                    None
                }
            };

            let Some(point) = point else {
                // A cancel that arrived while idle has nothing to abort; the
                // HTTP handler already cleared the queue. Consume the flag.
                if self.shared.cancel.swap(false, Ordering::SeqCst) {
                    tracing::debug!("Cancel flag consumed while idle");
                }
                std::thread::sleep(self.idle_sleep);
                continue;
            };

            match self.execute_point(&point) {
                Ok(()) => {}
                Err(MotionError::Cancelled) => {
                    tracing::info!("Move cancelled mid-flight");
                    self.shared.queue.lock().unwrap().clear();
                    self.shared.cancel.store(false, Ordering::SeqCst);
                    self.pen.lock().unwrap().lift();
                }
                Err(e) => {
                    tracing::error!("Move failed, clearing queue: {e}");
                    self.shared.queue.lock().unwrap().clear();
                }
            }
        }
        tracing::info!("Motion worker stopped");
    }

    fn execute_point(&self, point: &QueuedPoint) -> Result<(), MotionError> {
        let lengths = self.resolve_lengths(point)?;
        let target_left = self.geometry.steps_for_length(lengths.left);
        let target_right = self.geometry.steps_for_length(lengths.right);

        let (current_left, current_right) = {
            let state = self.shared.state.lock().unwrap();
            (state.left_steps, state.right_steps)
        };
        let delta_left = target_left - current_left;
        let delta_right = target_right - current_right;

        // Pen first; the pulse engine only starts once the servo settled.
        self.pen.lock().unwrap().set_down(point.pen_down);

        let speed = effective_speed(&self.speeds, point.speed, point.pen_down);
        tracing::debug!(
            "Executing move: deltas ({delta_left}, {delta_right}) steps at {speed} sps, pen {}",
            if point.pen_down { "down" } else { "up" }
        );

        self.shared.left_busy.store(true, Ordering::SeqCst);
        self.shared.right_busy.store(true, Ordering::SeqCst);
        let result = {
            let mut motors = self.motors.lock().unwrap();
            self.engine
                .run(&mut motors, delta_left, delta_right, speed, &self.shared.cancel)
        };
        self.shared.left_busy.store(false, Ordering::SeqCst);
        self.shared.right_busy.store(false, Ordering::SeqCst);
        result?;

        let mut state = self.shared.state.lock().unwrap();
        state.left_steps = target_left;
        state.right_steps = target_right;
        state.left_len_mm = lengths.left;
        state.right_len_mm = lengths.right;
        state.pen_down = point.pen_down;
        match self.geometry.position(lengths) {
            Ok((x, y)) => {
                state.x_mm = x;
                state.y_mm = y;
            }
            Err(e) => {
                // Lengths were reachable by construction; keep the last pose
                // for reporting if the back-solve degenerates anyway.
                if let Target::Position { x, y } = point.target {
                    state.x_mm = x;
                    state.y_mm = y;
                } else {
                    tracing::warn!("Forward kinematics failed after move: {e}");
                }
            }
        }
        Ok(())
    }

    fn resolve_lengths(&self, point: &QueuedPoint) -> Result<StringLengths, MotionError> {
        match point.target {
            Target::Lengths { left, right } => {
                if !left.is_finite() || !right.is_finite() || left < 0.0 || right < 0.0 {
                    return Err(MotionError::Kinematics(
                        crate::motion::KinematicsError::Unsolvable { left, right },
                    ));
                }
                Ok(StringLengths { left, right })
            }
            Target::Position { x, y } => Ok(self.geometry.string_lengths(x, y)?),
        }
    }
}
