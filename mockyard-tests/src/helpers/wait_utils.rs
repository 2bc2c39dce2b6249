//! Async utilities to wait for state transitions

use std::path::Path;
use std::time::Duration;

use mockyard_daemon::registry::InstanceRegistry;
use thiserror::Error;
use tokio::time::{Instant, sleep};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<(), WaitError> {
    let start = Instant::now();
    loop {
        if condition() {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(WaitError::Timeout(timeout));
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Wait for `port` to drop out of the registry's status listing
pub async fn wait_for_not_running(
    registry: &InstanceRegistry,
    port: u16,
    timeout: Duration,
) -> Result<(), WaitError> {
    wait_until(timeout, || registry.status().iter().all(|s| s.port != port)).await
}

/// Wait for a log file to contain `needle`, returning the whole file
pub async fn wait_for_log_line(
    path: &Path,
    needle: &str,
    timeout: Duration,
) -> Result<String, WaitError> {
    let mut content = String::new();
    wait_until(timeout, || {
        content = std::fs::read_to_string(path).unwrap_or_default();
        content.contains(needle)
    })
    .await?;
    Ok(content)
}
