// src/supervisor/sender.rs - Job runner: batching, backpressure, retries
use crate::config::SupervisorConfig;
use crate::motion::Geometry;
use crate::supervisor::client::{
    parse_device_pose, parse_queue_telemetry, DeviceClient, DevicePathRequest, DevicePoint,
    QueueTelemetry, SendFailure,
};
use crate::supervisor::job::{JobState, JobStatus};
use crate::supervisor::{PathPoint, SupervisorError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// Latest device status payload with its fetch time, kept by the poller and
/// the sender's own ready checks.
#[derive(Debug, Clone)]
pub struct CachedStatus {
    pub payload: Value,
    pub fetched_at: SystemTime,
}

#[derive(Clone)]
struct ActiveJob {
    state: Arc<Mutex<JobState>>,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

struct RunnerInner {
    config: SupervisorConfig,
    client: DeviceClient,
    geometry: Geometry,
    /// The current job, preserved after it reaches a terminal status and
    /// replaced only when a new job starts.
    job: Mutex<Option<ActiveJob>>,
    device_status: Mutex<Option<CachedStatus>>,
}

impl RunnerInner {
    fn store_device_status(&self, payload: Value) {
        let mut slot = self.device_status.lock().unwrap();
        *slot = Some(CachedStatus {
            payload,
            fetched_at: SystemTime::now(),
        });
    }
}

/// Streams one job at a time to the device: splits the point list into
/// batches, respects device backpressure, retries transient failures, and
/// tracks the job state machine.
#[derive(Clone)]
pub struct JobRunner {
    inner: Arc<RunnerInner>,
}

enum RunAbort {
    Cancelled,
    Failed(String),
}

impl JobRunner {
    pub fn new(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let request_timeout = Duration::from_secs_f64(config.request_timeout_secs);
        let status_timeout = request_timeout.min(Duration::from_secs(5));
        let client = DeviceClient::new(&config.controller_url, request_timeout, status_timeout)?;
        let geometry = Geometry::new(&config.board, &config.motors);
        Ok(Self {
            inner: Arc::new(RunnerInner {
                config,
                client,
                geometry,
                job: Mutex::new(None),
                device_status: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &DeviceClient {
        &self.inner.client
    }

    pub fn store_device_status(&self, payload: Value) {
        self.inner.store_device_status(payload);
    }

    /// Kick off a new job. Rejects with `Busy` while another job is still
    /// active. The supervisor prepends a pen-up travel move to the first
    /// target so the gondola repositions without drawing.
    pub async fn start_job(
        &self,
        points: Vec<PathPoint>,
        start: Option<PathPoint>,
        speed: u32,
        reset: bool,
    ) -> Result<Value, SupervisorError> {
        if points.is_empty() {
            return Err(SupervisorError::BadRequest(
                "points must not be empty".to_string(),
            ));
        }

        let first = points[0];
        let mut job_points = Vec::with_capacity(points.len() + 1);
        job_points.push(PathPoint {
            x: first.x,
            y: first.y,
            pen_down: false,
        });
        job_points.extend(points);

        // Without an explicit start, trust the device's own idea of where
        // the gondola is.
        let start = match start {
            Some(s) => s,
            None => {
                let pose = match self.inner.client.status().await {
                    Ok(payload) => {
                        let pose = parse_device_pose(&payload);
                        self.inner.store_device_status(payload);
                        pose
                    }
                    Err(_) => None,
                };
                pose.ok_or_else(|| {
                    SupervisorError::BadRequest(
                        "startPosition required (live device state unavailable)".to_string(),
                    )
                })?
            }
        };

        let speed = speed.max(1);
        let active = {
            let mut slot = self.inner.job.lock().unwrap();
            if let Some(existing) = slot.as_ref() {
                if existing.state.lock().unwrap().status.is_active() {
                    return Err(SupervisorError::Busy);
                }
            }
            let id = Uuid::new_v4().to_string();
            let state = JobState::new(id, job_points.len(), self.inner.config.batch_size);
            let active = ActiveJob {
                state: Arc::new(Mutex::new(state)),
                cancel: Arc::new(AtomicBool::new(false)),
                paused: Arc::new(AtomicBool::new(false)),
            };
            *slot = Some(active.clone());
            active
        };

        let inner = self.inner.clone();
        let task_job = active.clone();
        tokio::spawn(async move {
            run_job(inner, task_job, job_points, start, speed, reset).await;
        });

        let state = active.state.lock().unwrap();
        Ok(json!({
            "success": true,
            "jobId": state.id,
            "status": state.status,
            "totalPoints": state.total_points,
            "batchSize": self.inner.config.batch_size,
        }))
    }

    /// Stop sending new batches. In-flight batches on the device complete
    /// naturally; the pause granularity is one batch.
    pub fn pause(&self) -> Option<Value> {
        let active = self.inner.job.lock().unwrap().clone()?;
        {
            let mut state = active.state.lock().unwrap();
            if matches!(state.status, JobStatus::Pending | JobStatus::Running) {
                active.paused.store(true, Ordering::SeqCst);
                let _ = state.transition(JobStatus::Paused);
            }
        }
        Some(self.envelope())
    }

    pub fn resume(&self) -> Option<Value> {
        let active = self.inner.job.lock().unwrap().clone()?;
        {
            let mut state = active.state.lock().unwrap();
            if state.status == JobStatus::Paused {
                active.paused.store(false, Ordering::SeqCst);
                let _ = state.transition(JobStatus::Running);
            }
        }
        Some(self.envelope())
    }

    /// Cancel the active job: flag the sender loop, tell the device to
    /// abort, and settle the final status on the acknowledgement.
    pub async fn cancel(&self) -> Option<Value> {
        let active = { self.inner.job.lock().unwrap().clone() }?;
        let was_active = {
            let mut state = active.state.lock().unwrap();
            if state.status.is_active() {
                active.cancel.store(true, Ordering::SeqCst);
                active.paused.store(false, Ordering::SeqCst);
                let _ = state.transition(JobStatus::Cancelling);
                true
            } else {
                false
            }
        };
        if was_active {
            match self.inner.client.cancel().await {
                Ok(()) => {
                    let mut state = active.state.lock().unwrap();
                    let _ = state.transition(JobStatus::Cancelled);
                }
                Err(e) => {
                    let mut state = active.state.lock().unwrap();
                    state.fail(format!("device cancel failed: {e}"));
                }
            }
        }
        Some(self.envelope())
    }

    /// The job envelope served by the status endpoint. Terminal jobs keep
    /// reporting their final state until a new job replaces them.
    pub fn envelope(&self) -> Value {
        let active = self.inner.job.lock().unwrap().clone();
        let cached = self.inner.device_status.lock().unwrap().clone();

        let Some(active) = active else {
            return json!({ "status": "idle" });
        };
        let state = active.state.lock().unwrap().clone();

        let mut envelope = json!({
            "jobId": state.id,
            "status": state.status,
            "totalPoints": state.total_points,
            "sentPoints": state.sent_points,
            "totalBatches": state.total_batches,
            "sentBatches": state.sent_batches,
            "startedAt": state.started_at,
            "finishedAt": state.finished_at,
            "paused": state.status == JobStatus::Paused,
        });
        if let Some(error) = &state.error {
            envelope["error"] = json!(error);
        }
        if state.status.is_terminal() && state.status != JobStatus::Completed {
            envelope["lastState"] = json!(state.status);
        }
        if let Some(cached) = cached {
            let age = cached.fetched_at.elapsed().unwrap_or_default();
            envelope["stale"] =
                json!(age > Duration::from_secs(self.inner.config.stale_after_secs));
            envelope["controllerStatus"] = cached.payload;
        }
        envelope
    }
}

fn set_status(active: &ActiveJob, to: JobStatus) {
    let mut state = active.state.lock().unwrap();
    if let Err(e) = state.transition(to) {
        tracing::warn!("Ignoring job transition: {e}");
    }
}

async fn run_job(
    inner: Arc<RunnerInner>,
    active: ActiveJob,
    points: Vec<PathPoint>,
    start: PathPoint,
    speed: u32,
    reset: bool,
) {
    if !active.paused.load(Ordering::SeqCst) {
        set_status(&active, JobStatus::Running);
    }
    let job_id = active.state.lock().unwrap().id.clone();
    tracing::info!("Job {job_id}: streaming {} points", points.len());

    let outcome = stream_batches(&inner, &active, &points, start, speed, reset).await;
    match outcome {
        Ok(()) => {
            set_status(&active, JobStatus::Completed);
            tracing::info!("Job {job_id}: completed");
        }
        Err(RunAbort::Cancelled) => {
            set_status(&active, JobStatus::Cancelled);
            tracing::info!("Job {job_id}: cancelled");
        }
        Err(RunAbort::Failed(message)) => {
            active.state.lock().unwrap().fail(message.clone());
            tracing::error!("Job {job_id}: failed: {message}");
        }
    }
}

async fn stream_batches(
    inner: &Arc<RunnerInner>,
    active: &ActiveJob,
    points: &[PathPoint],
    start: PathPoint,
    speed: u32,
    reset: bool,
) -> Result<(), RunAbort> {
    let config = &inner.config;
    let poll_interval = Duration::from_secs_f64(config.status_poll_interval_secs.max(0.1));
    let total = points.len();
    let mut sent = 0usize;
    let mut first_batch = true;

    while sent < total {
        wait_if_paused(active).await?;
        let telemetry = wait_until_ready(inner, active).await?;

        let chunk = determine_chunk_size(config, total - sent, first_batch, telemetry);
        if chunk == 0 {
            tokio::time::sleep(poll_interval).await;
            continue;
        }

        let end = (sent + chunk).min(total);
        let batch = &points[sent..end];
        let payload = build_payload(
            &inner.geometry,
            batch,
            first_batch && reset,
            start,
            speed,
            end == total,
        );

        send_with_retries(inner, active, &payload).await?;
        {
            let mut state = active.state.lock().unwrap();
            state.record_batch(batch.len());
            tracing::debug!(
                "Sent batch {}/{} ({} points)",
                state.sent_batches,
                state.total_batches,
                batch.len()
            );
        }
        sent = end;
        first_batch = false;
    }

    await_device_drain(inner, active).await
}

async fn wait_if_paused(active: &ActiveJob) -> Result<(), RunAbort> {
    loop {
        if active.cancel.load(Ordering::SeqCst) {
            return Err(RunAbort::Cancelled);
        }
        if !active.paused.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Poll device status until it has room for another batch. Three
/// consecutive polling errors fall through to an optimistic send; the
/// status timeout bounds the whole wait.
async fn wait_until_ready(
    inner: &Arc<RunnerInner>,
    active: &ActiveJob,
) -> Result<Option<QueueTelemetry>, RunAbort> {
    let config = &inner.config;
    let poll_interval = Duration::from_secs_f64(config.status_poll_interval_secs.max(0.1));
    let deadline = Instant::now() + Duration::from_secs_f64(config.status_timeout_secs);
    let mut consecutive_errors = 0u32;

    loop {
        if active.cancel.load(Ordering::SeqCst) {
            return Err(RunAbort::Cancelled);
        }
        match inner.client.status().await {
            Ok(payload) => {
                let telemetry = parse_queue_telemetry(&payload);
                inner.store_device_status(payload);
                if allows_send(config, telemetry) {
                    return Ok(telemetry);
                }
                consecutive_errors = 0;
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= 3 {
                    tracing::warn!("Device status unavailable ({e}); proceeding with send");
                    return Ok(None);
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(RunAbort::Failed(
                "device did not become ready in time".to_string(),
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

fn allows_send(config: &SupervisorConfig, telemetry: Option<QueueTelemetry>) -> bool {
    match telemetry {
        Some(t) => t.size < config.device_queue_capacity && t.size < config.fill_target(),
        // No telemetry; default to allowing the send.
        None => true,
    }
}

/// The first batch carries only the travel-to-start point. Later batches
/// adapt to queue telemetry: top the queue up to the fill target without
/// exceeding remaining device capacity or the configured batch size.
fn determine_chunk_size(
    config: &SupervisorConfig,
    remaining: usize,
    first_batch: bool,
    telemetry: Option<QueueTelemetry>,
) -> usize {
    if remaining == 0 {
        return 0;
    }
    if first_batch {
        return 1;
    }
    match telemetry {
        Some(t) => {
            let available = config.device_queue_capacity.saturating_sub(t.size);
            if available == 0 {
                return 0;
            }
            let desired = config
                .fill_target()
                .saturating_sub(t.size)
                .max(config.min_chunk_size);
            desired
                .min(remaining)
                .min(available)
                .min(config.batch_size)
                .max(1)
        }
        None => remaining.min(config.batch_size),
    }
}

fn build_payload(
    geometry: &Geometry,
    batch: &[PathPoint],
    reset: bool,
    start: PathPoint,
    speed: u32,
    end_of_job: bool,
) -> DevicePathRequest {
    let points = batch
        .iter()
        .filter_map(|p| match geometry.string_lengths(p.x, p.y) {
            Ok(lengths) => Some(DevicePoint {
                l1: lengths.left,
                l2: lengths.right,
                pen_down: p.pen_down,
            }),
            Err(e) => {
                tracing::warn!("Dropping unreachable point ({}, {}): {e}", p.x, p.y);
                None
            }
        })
        .collect();

    // The start position only accompanies the resetting first batch; sent
    // later it would teleport the device's coordinates back to the start.
    let start_position = if reset {
        geometry
            .string_lengths(start.x, start.y)
            .ok()
            .map(|lengths| DevicePoint {
                l1: lengths.left,
                l2: lengths.right,
                pen_down: start.pen_down,
            })
    } else {
        None
    };

    DevicePathRequest {
        reset,
        end_of_job,
        speed: Some(speed),
        start_position,
        points,
    }
}

/// Submit one batch with exponential backoff on transient failures,
/// bounded by the per-batch retry deadline.
async fn send_with_retries(
    inner: &Arc<RunnerInner>,
    active: &ActiveJob,
    payload: &DevicePathRequest,
) -> Result<(), RunAbort> {
    let config = &inner.config;
    let deadline = Instant::now() + Duration::from_secs_f64(config.send_retry_timeout_secs);
    let base_interval = Duration::from_secs_f64(config.send_retry_interval_secs.max(0.1));
    let mut attempt = 0u32;

    loop {
        if active.cancel.load(Ordering::SeqCst) {
            return Err(RunAbort::Cancelled);
        }
        wait_if_paused(active).await?;

        attempt += 1;
        match inner.client.send_path(payload).await {
            Ok(()) => return Ok(()),
            Err(SendFailure::Retryable(message)) => {
                let backoff = base_interval
                    .saturating_mul(1u32 << (attempt - 1).min(4))
                    .min(Duration::from_secs(30));
                tracing::warn!("Batch send attempt {attempt} failed: {message}");
                if Instant::now() + backoff > deadline {
                    return Err(RunAbort::Failed(message));
                }
                tokio::time::sleep(backoff).await;
            }
            Err(SendFailure::Fatal(message)) => return Err(RunAbort::Failed(message)),
        }
    }
}

/// After the final batch, the job is complete only once the device reports
/// an empty queue and no execution.
async fn await_device_drain(inner: &Arc<RunnerInner>, active: &ActiveJob) -> Result<(), RunAbort> {
    let config = &inner.config;
    let poll_interval = Duration::from_secs_f64(config.status_poll_interval_secs.max(0.1));
    let deadline = Instant::now() + Duration::from_secs_f64(config.status_timeout_secs);

    loop {
        if active.cancel.load(Ordering::SeqCst) {
            return Err(RunAbort::Cancelled);
        }
        if let Ok(payload) = inner.client.status().await {
            let telemetry = parse_queue_telemetry(&payload);
            inner.store_device_status(payload);
            if let Some(t) = telemetry {
                if t.size == 0 && !t.is_executing {
                    return Ok(());
                }
            }
        }
        if Instant::now() >= deadline {
            return Err(RunAbort::Failed(
                "device did not finish the job in time".to_string(),
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            batch_size: 100,
            min_chunk_size: 50,
            device_queue_capacity: 3000,
            queue_fill_target: Some(2500),
            ..SupervisorConfig::default()
        }
    }

    #[test]
    fn test_first_batch_is_single_travel_point() {
        assert_eq!(determine_chunk_size(&config(), 500, true, None), 1);
    }

    #[test]
    fn test_chunk_respects_batch_size_without_telemetry() {
        assert_eq!(determine_chunk_size(&config(), 500, false, None), 100);
        assert_eq!(determine_chunk_size(&config(), 30, false, None), 30);
    }

    #[test]
    fn test_chunk_zero_when_device_full() {
        let telemetry = QueueTelemetry {
            size: 3000,
            is_executing: true,
        };
        assert_eq!(determine_chunk_size(&config(), 500, false, Some(telemetry)), 0);
    }

    #[test]
    fn test_chunk_limited_by_remaining_capacity() {
        let telemetry = QueueTelemetry {
            size: 2980,
            is_executing: true,
        };
        assert_eq!(
            determine_chunk_size(&config(), 500, false, Some(telemetry)),
            20
        );
    }

    #[test]
    fn test_allows_send_below_fill_target() {
        let cfg = config();
        assert!(allows_send(
            &cfg,
            Some(QueueTelemetry {
                size: 100,
                is_executing: true
            })
        ));
        assert!(!allows_send(
            &cfg,
            Some(QueueTelemetry {
                size: 2500,
                is_executing: true
            })
        ));
        assert!(allows_send(&cfg, None));
    }

    #[test]
    fn test_payload_start_position_only_on_reset() {
        let geometry = Geometry::new(
            &crate::config::BoardConfig::default(),
            &crate::config::MotorsConfig::default(),
        );
        let start = PathPoint {
            x: 100.0,
            y: 100.0,
            pen_down: false,
        };
        let batch = [PathPoint {
            x: 200.0,
            y: 200.0,
            pen_down: true,
        }];

        let first = build_payload(&geometry, &batch, true, start, 1800, false);
        assert!(first.reset);
        assert!(first.start_position.is_some());
        assert!(!first.end_of_job);

        let later = build_payload(&geometry, &batch, false, start, 1800, true);
        assert!(!later.reset);
        assert!(later.start_position.is_none());
        assert!(later.end_of_job);
    }
}
