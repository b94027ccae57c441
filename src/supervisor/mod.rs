// src/supervisor/mod.rs - The path-streaming service between the designer
// and the device
pub mod api;
pub mod client;
pub mod job;
pub mod poller;
pub mod sender;

pub use client::DeviceClient;
pub use job::{JobState, JobStatus};
pub use sender::JobRunner;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("A path transmission is already in progress")]
    Busy,
    #[error("{0}")]
    BadRequest(String),
    #[error("Illegal job transition {from:?} -> {to:?}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Controller error: {0}")]
    Controller(String),
}

/// One point of a job as the designer submits it: absolute board
/// coordinates plus the pen state while travelling TO this point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    pub pen_down: bool,
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
