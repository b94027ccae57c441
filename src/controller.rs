// src/controller.rs - The owned controller value shared between the HTTP
// surface and the motion worker
use crate::config::Config;
use crate::hardware::{MotorBank, MotorId, PenServo};
use crate::motion::{
    Geometry, JobQueue, MotionError, PenActuator, PulseEngine, QueuedPoint, Scheduler,
    StringLengths, Target,
};
use crate::state::MachineState;
use crate::web::models::{
    MotorStatus, PathRequest, PathResponse, PointSpec, QueueInfo, SidePair, StartPosition,
    StateInfo, StatusResponse, WifiInfo,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Unknown motor '{0}'")]
    UnknownMotor(String),
    #[error("{0}")]
    InvalidCoordinates(String),
    #[error("Queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("{0}")]
    Busy(String),
    #[error("Machine is not initialized; submit a start position first")]
    Uninitialized,
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// State shared between the network task and the motion worker. The queue
/// lock also guards the `executing` and `end_of_job` flags; the state lock
/// guards the pose. Neither is held while pulses are being emitted.
pub struct Shared {
    pub state: Mutex<MachineState>,
    pub queue: Mutex<JobQueue>,
    pub cancel: AtomicBool,
    pub shutdown: AtomicBool,
    pub left_busy: AtomicBool,
    pub right_busy: AtomicBool,
}

/// Owns the machine state, job queue, pen actuator, and motor drivers. The
/// HTTP layer holds a cloned handle; the motion worker owns the scheduler
/// loop and is the sole writer to pose and step counters after startup.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
    motors: Arc<Mutex<MotorBank>>,
    pen: Arc<Mutex<PenActuator>>,
    engine: PulseEngine,
    geometry: Geometry,
    config: Arc<Config>,
}

impl Controller {
    pub fn new(config: Config, motors: MotorBank, pen_servo: Box<dyn PenServo>) -> Self {
        let geometry = Geometry::from_config(&config);
        let engine = PulseEngine::new(config.motors.min_pulse_us);
        let pen = PenActuator::new(pen_servo, &config.pen);
        let shared = Shared {
            state: Mutex::new(MachineState::new()),
            queue: Mutex::new(JobQueue::new(config.queue.capacity)),
            cancel: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            left_busy: AtomicBool::new(false),
            right_busy: AtomicBool::new(false),
        };
        Self {
            shared: Arc::new(shared),
            motors: Arc::new(Mutex::new(motors)),
            pen: Arc::new(Mutex::new(pen)),
            engine,
            geometry,
            config: Arc::new(config),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the motion worker on its own OS thread. The pulse loop needs
    /// tight timing and must not share a scheduler with I/O.
    pub fn spawn_motion_worker(&self) -> std::thread::JoinHandle<()> {
        let scheduler = Scheduler::new(
            self.shared.clone(),
            self.motors.clone(),
            self.pen.clone(),
            self.engine,
            self.geometry,
            self.config.speeds.clone(),
        );
        std::thread::Builder::new()
            .name("motion".to_string())
            .spawn(move || scheduler.run())
            .expect("failed to spawn motion worker thread")
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> StatusResponse {
        let (size, is_executing) = {
            let queue = self.shared.queue.lock().unwrap();
            (queue.len(), queue.executing)
        };
        StatusResponse {
            wifi: WifiInfo {
                ip: self.config.web.bind_address.clone(),
            },
            motors: vec![
                MotorStatus {
                    id: MotorId::Left.as_str(),
                    busy: self.shared.left_busy.load(Ordering::SeqCst),
                },
                MotorStatus {
                    id: MotorId::Right.as_str(),
                    busy: self.shared.right_busy.load(Ordering::SeqCst),
                },
            ],
            state: self.state_info(),
            queue: QueueInfo { size, is_executing },
        }
    }

    fn state_info(&self) -> StateInfo {
        let state = self.shared.state.lock().unwrap();
        StateInfo {
            initialized: state.initialized,
            x_mm: state.x_mm,
            y_mm: state.y_mm,
            pen_down: state.pen_down,
            lengths_mm: SidePair {
                left: state.left_len_mm,
                right: state.right_len_mm,
            },
            steps: SidePair {
                left: state.left_steps,
                right: state.right_steps,
            },
        }
    }

    /// Diagnostic single-motor jog. Pulses immediately on the calling
    /// thread and deliberately does NOT update the pose; it exists to test
    /// a motor, not to draw. Blocking: call from a blocking context.
    pub fn jog(&self, motor: &str, steps: i64, speed: Option<u32>) -> Result<(), ControllerError> {
        let id = MotorId::parse(motor)
            .ok_or_else(|| ControllerError::UnknownMotor(motor.to_string()))?;
        if self.shared.queue.lock().unwrap().executing {
            return Err(ControllerError::Busy(
                "machine is executing a job".to_string(),
            ));
        }
        let busy = match id {
            MotorId::Left => &self.shared.left_busy,
            MotorId::Right => &self.shared.right_busy,
        };
        if busy.swap(true, Ordering::SeqCst) {
            return Err(ControllerError::Busy(format!(
                "motor {} is busy",
                id.as_str()
            )));
        }

        let speed = speed
            .unwrap_or(self.config.speeds.default_sps)
            .clamp(1, self.config.speeds.max_sps);
        let result = match self.motors.try_lock() {
            Ok(mut motors) => {
                self.engine
                    .run_single(motors.driver_mut(id), steps, speed, &self.shared.cancel)
            }
            Err(_) => {
                busy.store(false, Ordering::SeqCst);
                return Err(ControllerError::Busy("motors are busy".to_string()));
            }
        };
        busy.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => Ok(()),
            Err(MotionError::DeltaOverflow { delta }) => Err(ControllerError::BadRequest(format!(
                "step count {delta} out of range"
            ))),
            Err(e) => Err(ControllerError::Motion(e)),
        }
    }

    /// Synchronous pen command. Returns true when the servo actually moved.
    /// Blocks for the settle delay on a real transition.
    pub fn set_pen(&self, down: bool) -> bool {
        let moved = self.pen.lock().unwrap().set_down(down);
        self.shared.state.lock().unwrap().pen_down = down;
        moved
    }

    /// Handle one `/api/path` submission. See the HTTP surface docs for the
    /// full semantics (reset, start position, end-of-job, capacity).
    pub fn submit_path(&self, request: &PathRequest) -> Result<PathResponse, ControllerError> {
        if request.reset {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.clear();
            tracing::info!("Reset: queue cleared");
        }

        let initialized = self.shared.state.lock().unwrap().initialized;
        if request.reset || !initialized {
            let start = request.start_position.as_ref().ok_or_else(|| {
                ControllerError::BadRequest(
                    "startPosition is required when resetting or uninitialized".to_string(),
                )
            })?;
            self.apply_start_position(start)?;
        }

        let mut accepted: Vec<QueuedPoint> = Vec::with_capacity(request.points.len());
        let mut skipped = 0usize;
        for spec in &request.points {
            match self.resolve_point(spec, request.speed) {
                Some(point) => accepted.push(point),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!("Skipped {skipped} malformed points in submission");
        }

        let accepted_count = accepted.len();
        let queue_size = {
            let mut queue = self.shared.queue.lock().unwrap();
            if !accepted.is_empty() {
                queue.enqueue_many(accepted).map_err(|_| {
                    ControllerError::QueueFull {
                        capacity: queue.capacity(),
                    }
                })?;
            }
            if request.end_of_job {
                queue.end_of_job = true;
            }
            if !queue.is_empty() && !queue.executing {
                queue.executing = true;
            }
            queue.len()
        };

        tracing::debug!(
            "Path batch: {accepted_count} accepted, queue size {queue_size}, endOfJob {}",
            request.end_of_job
        );

        Ok(PathResponse {
            accepted: accepted_count,
            queue_size,
            state: self.state_info(),
        })
    }

    /// Synchronize the internal pose with a declared physical position.
    /// Nothing moves; only counters are written. The pen servo is driven to
    /// the declared state so its cache matches reality.
    fn apply_start_position(&self, start: &StartPosition) -> Result<(), ControllerError> {
        let pen_down = start.pen_down.unwrap_or(false);

        let (lengths, steps) = if let (Some(l1), Some(l2)) = (start.l1, start.l2) {
            (StringLengths { left: l1, right: l2 }, None)
        } else if let (Some(left), Some(right)) = (start.left_length_mm, start.right_length_mm) {
            (StringLengths { left, right }, None)
        } else if let (Some(left), Some(right)) = (start.left_steps, start.right_steps) {
            (
                StringLengths {
                    left: self.geometry.length_for_steps(left),
                    right: self.geometry.length_for_steps(right),
                },
                Some((left, right)),
            )
        } else if let (Some(x), Some(y)) = (start.x, start.y) {
            let lengths = self
                .geometry
                .string_lengths(x, y)
                .map_err(|e| ControllerError::InvalidCoordinates(e.to_string()))?;
            (lengths, None)
        } else {
            return Err(ControllerError::BadRequest(
                "startPosition needs (x, y), (l1, l2), lengths, or step counts".to_string(),
            ));
        };

        if !lengths.left.is_finite()
            || !lengths.right.is_finite()
            || lengths.left < 0.0
            || lengths.right < 0.0
        {
            return Err(ControllerError::InvalidCoordinates(
                "start position lengths must be finite and non-negative".to_string(),
            ));
        }

        let (x, y) = self
            .geometry
            .position(lengths)
            .map_err(|e| ControllerError::InvalidCoordinates(e.to_string()))?;

        let (left_steps, right_steps) = steps.unwrap_or_else(|| {
            (
                self.geometry.steps_for_length(lengths.left),
                self.geometry.steps_for_length(lengths.right),
            )
        });

        self.pen.lock().unwrap().set_down(pen_down);
        self.shared
            .state
            .lock()
            .unwrap()
            .sync_to(x, y, lengths, left_steps, right_steps, pen_down);
        tracing::info!(
            "Initialized at ({x:.1}, {y:.1}) mm, lengths ({:.1}, {:.1}) mm",
            lengths.left,
            lengths.right
        );
        Ok(())
    }

    /// Turn one submitted point into a queued move. Malformed points yield
    /// None and are skipped by the caller.
    fn resolve_point(&self, spec: &PointSpec, batch_speed: Option<u32>) -> Option<QueuedPoint> {
        let target = if let (Some(l1), Some(l2)) = (spec.l1, spec.l2) {
            if !l1.is_finite() || !l2.is_finite() || l1 < 0.0 || l2 < 0.0 {
                return None;
            }
            Target::Lengths {
                left: l1,
                right: l2,
            }
        } else if let (Some(x), Some(y)) = (spec.x, spec.y) {
            // Validate reachability now so the scheduler never sees a
            // point it must refuse.
            self.geometry.string_lengths(x, y).ok()?;
            Target::Position { x, y }
        } else {
            return None;
        };

        Some(QueuedPoint {
            target,
            pen_down: spec.pen_down.unwrap_or(true),
            speed: spec.speed.or(batch_speed).unwrap_or(0),
        })
    }

    /// Abort everything: any in-flight move halts within one step period,
    /// the queue is dropped, outputs are disabled, and the pen lifts.
    pub fn cancel(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        self.shared.queue.lock().unwrap().clear();
        // Waits at most one step period for the pulse loop to bail out.
        self.motors.lock().unwrap().disable_all();
        self.pen.lock().unwrap().lift();
        self.shared.state.lock().unwrap().pen_down = false;
        tracing::info!("Cancelled: queue cleared, outputs disabled, pen up");
    }

    /// Queue a pen-up travel move to the configured park position and mark
    /// the job stream finished.
    pub fn park(&self) -> Result<PathResponse, ControllerError> {
        if !self.shared.state.lock().unwrap().initialized {
            return Err(ControllerError::Uninitialized);
        }
        let point = QueuedPoint {
            target: Target::Position {
                x: self.config.board.park_x_mm,
                y: self.config.board.park_y_mm,
            },
            pen_down: false,
            speed: 0,
        };
        let queue_size = {
            let mut queue = self.shared.queue.lock().unwrap();
            queue
                .enqueue_many(vec![point])
                .map_err(|_| ControllerError::QueueFull {
                    capacity: queue.capacity(),
                })?;
            queue.end_of_job = true;
            if !queue.executing {
                queue.executing = true;
            }
            queue.len()
        };
        tracing::info!(
            "Parking at ({}, {})",
            self.config.board.park_x_mm,
            self.config.board.park_y_mm
        );
        Ok(PathResponse {
            accepted: 1,
            queue_size,
            state: self.state_info(),
        })
    }
}
