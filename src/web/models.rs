//! Data models for the device API requests and responses.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/path`. Points may be given as board coordinates or as
/// string lengths; both forms may be mixed within one batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRequest {
    #[serde(default)]
    pub reset: bool,

    #[serde(default)]
    pub end_of_job: bool,

    /// Batch-level speed applied to points that carry none of their own.
    #[serde(default)]
    pub speed: Option<u32>,

    #[serde(default)]
    pub start_position: Option<StartPosition>,

    #[serde(default)]
    pub points: Vec<PointSpec>,
}

/// Declares the current physical pose of the gondola; the device
/// synchronizes its counters with it and does not move. Accepted forms:
/// `(l1, l2)`, `(leftLengthMm, rightLengthMm)`, `(leftSteps, rightSteps)`,
/// or `(x, y)`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPosition {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub l1: Option<f64>,
    pub l2: Option<f64>,
    pub left_length_mm: Option<f64>,
    pub right_length_mm: Option<f64>,
    pub left_steps: Option<i64>,
    pub right_steps: Option<i64>,
    pub pen_down: Option<bool>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointSpec {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub l1: Option<f64>,
    pub l2: Option<f64>,
    pub pen_down: Option<bool>,
    pub speed: Option<u32>,
}

/// Body of `POST /api/move` (diagnostic single-motor jog).
#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub motor: String,
    pub steps: i64,
    #[serde(default)]
    pub speed: Option<u32>,
}

/// Body of `POST /api/pen`.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PenRequest {
    pub pen_down: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub wifi: WifiInfo,
    pub motors: Vec<MotorStatus>,
    pub state: StateInfo,
    pub queue: QueueInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct WifiInfo {
    pub ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MotorStatus {
    pub id: &'static str,
    pub busy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateInfo {
    pub initialized: bool,
    pub x_mm: f64,
    pub y_mm: f64,
    #[serde(rename = "penDown")]
    pub pen_down: bool,
    pub lengths_mm: SidePair<f64>,
    pub steps: SidePair<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SidePair<T> {
    pub left: T,
    pub right: T,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueInfo {
    pub size: usize,
    #[serde(rename = "isExecuting")]
    pub is_executing: bool,
}

/// Response to a path submission: how many points were accepted, the new
/// queue size, and a state snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathResponse {
    pub accepted: usize,
    pub queue_size: usize,
    pub state: StateInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
