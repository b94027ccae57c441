// src/supervisor/poller.rs - Periodic device status cache
use crate::supervisor::JobRunner;
use std::time::Duration;

/// Poll the device status on a fixed cadence and cache the payload for the
/// job envelope. Poll failures are expected while the device reboots; they
/// leave the previous snapshot in place, which the envelope then flags as
/// stale.
pub fn spawn_status_poller(runner: JobRunner) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs_f64(runner.config().status_poll_interval_secs.max(0.5));
    tokio::spawn(async move {
        loop {
            match runner.client().status().await {
                Ok(payload) => runner.store_device_status(payload),
                Err(e) => tracing::debug!("Status poll failed: {e}"),
            }
            tokio::time::sleep(interval).await;
        }
    })
}
