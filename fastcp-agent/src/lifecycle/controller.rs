//! The process-control seam.
//!
//! Everything the engine needs from the host's service manager, the FPM
//! masters and the proxy goes through [`ProcessController`]. The production
//! adapter is [`SystemController`](super::SystemController); tests substitute
//! a recording fake.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixStream;

use crate::errors::Result;

/// systemd unit running the reverse proxy.
pub const PROXY_UNIT: &str = "fastcp-caddy";

#[async_trait]
pub trait ProcessController: Send + Sync {
    /// True when units can be managed through systemd.
    async fn has_service_manager(&self) -> bool;

    async fn enable_unit(&self, unit: &str) -> Result<()>;

    /// `reload-or-restart`, falling back to `restart`, then `start`.
    async fn reload_or_restart_unit(&self, unit: &str) -> Result<()>;

    /// `reload`, falling back to `restart`, then `start`.
    async fn reload_unit(&self, unit: &str) -> Result<()>;

    async fn restart_unit(&self, unit: &str) -> Result<()>;

    async fn unit_active(&self, unit: &str) -> bool;

    async fn unit_enabled(&self, unit: &str) -> bool;

    async fn disable_unit_now(&self, unit: &str) -> Result<()>;

    async fn daemon_reload(&self) -> Result<()>;

    /// Graceful reload of the FPM master for `version` without a service
    /// manager, cold-starting it when no live master exists.
    async fn fpm_reload_direct(&self, version: &str) -> Result<()>;

    /// Stop the FPM master for `version` if running, then cold-start it.
    async fn fpm_restart_direct(&self, version: &str) -> Result<()>;

    async fn proxy_running(&self) -> bool;

    async fn start_proxy(&self) -> Result<()>;

    async fn reload_proxy(&self) -> Result<()>;

    /// Dial a Unix socket, succeeding only if something accepts within `timeout`.
    async fn connect_unix_socket(&self, path: &Path, timeout: Duration) -> std::io::Result<()> {
        match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("dial timed out after {:?}", timeout),
            )),
        }
    }
}
