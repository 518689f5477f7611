//! Async utilities to wait for host state

use std::path::Path;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::{Instant, sleep};

const POLL: Duration = Duration::from_millis(20);

/// Error type for wait operations
#[derive(Debug)]
pub enum WaitError {
    Timeout,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "Wait operation timed out"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Wait until something accepts connections on `path`
pub async fn wait_for_socket(path: &Path, timeout: Duration) -> Result<(), WaitError> {
    let deadline = Instant::now() + timeout;
    loop {
        if UnixStream::connect(path).await.is_ok() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(WaitError::Timeout);
        }
        sleep(POLL).await;
    }
}

/// Wait until `path` exists
pub async fn wait_for_file(path: &Path, timeout: Duration) -> Result<(), WaitError> {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(WaitError::Timeout);
        }
        sleep(POLL).await;
    }
}
