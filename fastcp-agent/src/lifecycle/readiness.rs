//! Socket readiness probing.
//!
//! A socket is ready when the file exists and a connection attempt is
//! accepted. Existence alone says nothing: a dead master leaves its socket
//! file behind.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::controller::ProcessController;
use crate::duration::{deserialize_duration, serialize_duration};

/// Deadlines for one escalation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReadinessPolicy {
    /// Wait after the initial reload
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub short: Duration,
    /// Wait after the forced restart
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub long: Duration,
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub interval: Duration,
    /// Per-socket connect timeout
    #[serde(deserialize_with = "deserialize_duration", serialize_with = "serialize_duration")]
    pub dial: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            short: Duration::from_secs(12),
            long: Duration::from_secs(35),
            interval: Duration::from_millis(150),
            dial: Duration::from_secs(1),
        }
    }
}

/// `None` when ready, otherwise why not.
pub async fn check_socket(
    controller: &dyn ProcessController,
    path: &std::path::Path,
    dial: Duration,
) -> Option<String> {
    if std::fs::metadata(path).is_err() {
        return Some("missing".to_string());
    }
    match controller.connect_unix_socket(path, dial).await {
        Ok(()) => None,
        Err(e) => Some(format!("not listening: {}", e)),
    }
}

/// Every socket in `paths` that is not ready, as `"<path> (<reason>)"`.
pub async fn unready_sockets(
    controller: &dyn ProcessController,
    paths: &[PathBuf],
    dial: Duration,
) -> Vec<String> {
    let mut out = Vec::new();
    for path in paths {
        if let Some(reason) = check_socket(controller, path, dial).await {
            out.push(format!("{} ({})", path.display(), reason));
        }
    }
    out
}

async fn all_ready(controller: &dyn ProcessController, paths: &[PathBuf], dial: Duration) -> bool {
    for path in paths {
        if check_socket(controller, path, dial).await.is_some() {
            return false;
        }
    }
    true
}

/// Poll until every socket is ready or `deadline` elapses.
pub async fn wait_for_sockets(
    controller: &dyn ProcessController,
    paths: &[PathBuf],
    deadline: Duration,
    policy: &ReadinessPolicy,
) -> bool {
    if paths.is_empty() {
        return true;
    }
    let until = Instant::now() + deadline;
    let mut rounds = 0u32;
    loop {
        rounds += 1;
        if all_ready(controller, paths, policy.dial).await {
            debug!("{} socket(s) ready after {} poll round(s)", paths.len(), rounds);
            return true;
        }
        if Instant::now() >= until {
            debug!("Sockets still not ready after {} poll round(s)", rounds);
            return false;
        }
        tokio::time::sleep(policy.interval).await;
    }
}
