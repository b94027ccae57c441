// src/supervisor/client.rs - HTTP client for the device controller
use crate::supervisor::SupervisorError;
use serde::Serialize;
use std::time::Duration;

/// Outcome classification for a batch submission. Retryable failures are
/// transient (timeouts, connection errors, 429, 5xx); fatal ones surface
/// immediately.
#[derive(Debug)]
pub enum SendFailure {
    Retryable(String),
    Fatal(String),
}

impl std::fmt::Display for SendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendFailure::Retryable(msg) => write!(f, "{msg} (retryable)"),
            SendFailure::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

/// Batch payload as the device expects it. Points travel as string lengths;
/// the supervisor converts from board coordinates before sending.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePathRequest {
    pub reset: bool,
    pub end_of_job: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_position: Option<DevicePoint>,
    pub points: Vec<DevicePoint>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePoint {
    pub l1: f64,
    pub l2: f64,
    pub pen_down: bool,
}

/// Queue telemetry pulled out of a device status payload.
#[derive(Debug, Clone, Copy)]
pub struct QueueTelemetry {
    pub size: usize,
    pub is_executing: bool,
}

pub struct DeviceClient {
    http: reqwest::Client,
    base_url: String,
    status_timeout: Duration,
}

impl DeviceClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        status_timeout: Duration,
    ) -> Result<Self, SupervisorError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            status_timeout,
        })
    }

    /// Fetch the full device status payload. Uses the shorter status
    /// timeout so polling never stalls the submission loop.
    pub async fn status(&self) -> Result<serde_json::Value, SupervisorError> {
        let url = format!("{}/api/status", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(self.status_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Submit one batch, classifying failures for the retry loop.
    pub async fn send_path(&self, payload: &DevicePathRequest) -> Result<(), SendFailure> {
        let url = format!("{}/api/path", self.base_url);
        let response = match self.http.post(&url).json(payload).send().await {
            Ok(r) => r,
            Err(e) => {
                return if e.is_timeout() || e.is_connect() {
                    Err(SendFailure::Retryable(e.to_string()))
                } else {
                    Err(SendFailure::Fatal(e.to_string()))
                };
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("device returned {status}: {body}");
        if status.as_u16() == 429 || status.is_server_error() {
            Err(SendFailure::Retryable(message))
        } else {
            Err(SendFailure::Fatal(message))
        }
    }

    pub async fn cancel(&self) -> Result<(), SupervisorError> {
        let url = format!("{}/api/cancel", self.base_url);
        self.http
            .post(&url)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Pull `queue.size` / `queue.isExecuting` out of a status payload.
pub fn parse_queue_telemetry(payload: &serde_json::Value) -> Option<QueueTelemetry> {
    let queue = payload.get("queue")?;
    let size = queue.get("size")?.as_u64()? as usize;
    let is_executing = queue
        .get("isExecuting")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Some(QueueTelemetry { size, is_executing })
}

/// Pull the current pose out of a status payload, for deriving a job's
/// start position from live device state.
pub fn parse_device_pose(payload: &serde_json::Value) -> Option<crate::supervisor::PathPoint> {
    let state = payload.get("state")?;
    Some(crate::supervisor::PathPoint {
        x: state.get("x_mm")?.as_f64()?,
        y: state.get("y_mm")?.as_f64()?,
        pen_down: state
            .get("penDown")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}
