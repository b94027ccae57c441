// src/motion/queue.rs - Bounded FIFO of queued move targets
use crate::motion::MotionError;
use std::collections::VecDeque;

/// A submitted target: either board coordinates or string lengths directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Position { x: f64, y: f64 },
    Lengths { left: f64, right: f64 },
}

/// One move the scheduler will execute. `speed` is a requested step rate in
/// steps/second; zero means "use the configured default".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedPoint {
    pub target: Target,
    pub pen_down: bool,
    pub speed: u32,
}

/// FIFO of queued points plus the two flags that describe the job stream.
///
/// `executing` is true while the motion worker should keep consuming;
/// `end_of_job` marks that the final batch of the current job has arrived,
/// so draining the queue means the job is complete rather than momentarily
/// starved between batches.
#[derive(Debug)]
pub struct JobQueue {
    points: VecDeque<QueuedPoint>,
    capacity: usize,
    pub executing: bool,
    pub end_of_job: bool,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::new(),
            capacity,
            executing: false,
            end_of_job: false,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a batch atomically. Rejects the whole batch when it would push
    /// the queue past capacity; nothing is enqueued in that case.
    pub fn enqueue_many(&mut self, points: Vec<QueuedPoint>) -> Result<usize, MotionError> {
        if self.points.len() + points.len() > self.capacity {
            return Err(MotionError::QueueFull {
                capacity: self.capacity,
            });
        }
        let accepted = points.len();
        self.points.extend(points);
        Ok(accepted)
    }

    pub fn pop_front(&mut self) -> Option<QueuedPoint> {
        self.points.pop_front()
    }

    /// Drop all queued points and reset both flags.
    pub fn clear(&mut self) {
        self.points.clear();
        self.executing = false;
        self.end_of_job = false;
    }
}
