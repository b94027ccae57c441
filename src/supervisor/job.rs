// src/supervisor/job.rs - Job lifecycle state machine
use crate::supervisor::{unix_now, SupervisorError};
use serde::Serialize;

/// Status of a streaming job. Terminal statuses are absorbing: once a job
/// is cancelled, completed, or failed, no transition changes it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled | JobStatus::Completed | JobStatus::Failed
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Explicit transition table. Anything not listed is illegal.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Paused)
                | (Pending, Cancelling)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Paused)
                | (Running, Cancelling)
                | (Running, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Cancelling)
                | (Paused, Cancelled)
                | (Paused, Failed)
                | (Cancelling, Cancelled)
                | (Cancelling, Failed)
        )
    }
}

/// One logical drawing job and its batch bookkeeping.
#[derive(Debug, Clone)]
pub struct JobState {
    pub id: String,
    pub status: JobStatus,
    pub total_points: usize,
    pub sent_points: usize,
    pub total_batches: usize,
    pub sent_batches: usize,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub error: Option<String>,
}

impl JobState {
    /// `total_points` includes the injected travel-to-start point, which is
    /// always a batch of its own.
    pub fn new(id: String, total_points: usize, batch_size: usize) -> Self {
        let user_points = total_points.saturating_sub(1);
        let total_batches = 1 + user_points.div_ceil(batch_size.max(1));
        Self {
            id,
            status: JobStatus::Pending,
            total_points,
            sent_points: 0,
            total_batches,
            sent_batches: 0,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Apply a status transition. Writes onto a terminal status are
    /// silently ignored (the documented merge rule); anything else not in
    /// the table is rejected.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), SupervisorError> {
        if self.status.is_terminal() || self.status == to {
            return Ok(());
        }
        if !self.status.can_transition(to) {
            return Err(SupervisorError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to == JobStatus::Running && self.started_at.is_none() {
            self.started_at = Some(unix_now());
        }
        if to.is_terminal() {
            self.finished_at = Some(unix_now());
        }
        Ok(())
    }

    pub fn record_batch(&mut self, points: usize) {
        self.sent_batches += 1;
        self.sent_points = (self.sent_points + points).min(self.total_points);
        self.total_batches = self.total_batches.max(self.sent_batches);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.transition(JobStatus::Failed).is_ok() && self.status == JobStatus::Failed {
            self.error = Some(message);
        }
    }
}
