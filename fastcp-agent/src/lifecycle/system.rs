//! [`ProcessController`] for a real Linux host: `systemctl` when systemd is
//! running, direct process control otherwise (containers, dev machines).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};
use tracing::{debug, info, warn};

use super::controller::{PROXY_UNIT, ProcessController};
use crate::cmd::Cmd;
use crate::errors::{AgentError, Result};
use crate::files::remove_file_if_exists;
use crate::layout::Layout;
use crate::php::find_fpm_binary;

const SYSTEMD_RUNTIME_DIR: &str = "/run/systemd/system";

/// Deadline for service manager actions (enable, reload, restart, start).
const SERVICE_ACTION_TIMEOUT: Duration = Duration::from_secs(90);
/// Deadline for state queries such as `is-active`.
const SERVICE_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
/// Deadline for direct php-fpm and caddy invocations.
const BINARY_TIMEOUT: Duration = Duration::from_secs(30);

const FPM_MASTER_TITLE: &str = "php-fpm: master process";

/// Command line of `pid` when it exists and is not a zombie.
pub(crate) fn live_process_cmdline(pid: u32) -> Option<String> {
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return None;
    }
    let mut sys = System::new();
    let sysinfo_pid = sysinfo::Pid::from_u32(pid);
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[sysinfo_pid]),
        true,
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
    );
    let process = sys.process(sysinfo_pid)?;
    if process.status() == ProcessStatus::Zombie {
        return None;
    }
    let cmdline = process
        .cmd()
        .iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ");
    Some(cmdline)
}

/// pids of non-zombie processes named exactly `name`, ascending.
pub(crate) fn live_pids_named(name: &str) -> Vec<u32> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());
    let mut pids: Vec<u32> = sys
        .processes_by_exact_name(OsStr::new(name))
        .filter(|p| p.status() != ProcessStatus::Zombie)
        .map(|p| p.pid().as_u32())
        .collect();
    pids.sort_unstable();
    pids
}

pub struct SystemController {
    layout: Layout,
}

impl SystemController {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        if !self.has_service_manager().await {
            return Err(AgentError::Operation("systemd unavailable".into()));
        }
        Cmd::new("systemctl")
            .args(args.iter().copied())
            .timeout(SERVICE_ACTION_TIMEOUT)
            .run()
            .await?;
        Ok(())
    }

    /// Try each action in turn; the last error wins.
    async fn systemctl_chain(&self, actions: &[&str], unit: &str) -> Result<()> {
        let mut last = None;
        for action in actions {
            match self.systemctl(&[action, unit]).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("systemctl {} {} failed: {}", action, unit, e);
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| AgentError::Internal("empty systemctl chain".into())))
    }

    fn fpm_binary(&self, version: &str) -> Result<PathBuf> {
        find_fpm_binary(version).ok_or_else(|| {
            AgentError::Operation(format!("php-fpm binary not found for version {}", version))
        })
    }

    /// pid of a live (non-zombie) FPM master for `version`, per its pid file.
    fn live_fpm_master(&self, version: &str) -> Option<i32> {
        let raw = std::fs::read_to_string(self.layout.fpm_pid_file(version)).ok()?;
        let pid: u32 = raw.trim().parse().ok()?;
        let cmdline = live_process_cmdline(pid)?;
        cmdline.contains(FPM_MASTER_TITLE).then_some(pid as i32)
    }

    async fn fpm_cold_start(&self, bin: &Path, version: &str) -> Result<()> {
        remove_file_if_exists(&self.layout.fpm_pid_file(version))?;
        Cmd::new(bin.display().to_string())
            .arg("-D")
            .timeout(BINARY_TIMEOUT)
            .run()
            .await?;
        info!("Started php-fpm {} directly", version);
        Ok(())
    }

    async fn fpm_config_test(&self, bin: &Path) -> Result<()> {
        Cmd::new(bin.display().to_string())
            .arg("-t")
            .timeout(BINARY_TIMEOUT)
            .run()
            .await?;
        Ok(())
    }

    fn caddyfile(&self) -> String {
        self.layout.caddyfile().display().to_string()
    }

    fn caddy_binary(&self) -> String {
        self.layout.caddy_binary.display().to_string()
    }
}

#[async_trait]
impl ProcessController for SystemController {
    async fn has_service_manager(&self) -> bool {
        Path::new(SYSTEMD_RUNTIME_DIR).exists() && which::which("systemctl").is_ok()
    }

    async fn enable_unit(&self, unit: &str) -> Result<()> {
        self.systemctl(&["enable", unit]).await
    }

    async fn reload_or_restart_unit(&self, unit: &str) -> Result<()> {
        self.systemctl_chain(&["reload-or-restart", "restart", "start"], unit)
            .await
    }

    async fn reload_unit(&self, unit: &str) -> Result<()> {
        self.systemctl_chain(&["reload", "restart", "start"], unit).await
    }

    async fn restart_unit(&self, unit: &str) -> Result<()> {
        self.systemctl(&["restart", unit]).await
    }

    async fn unit_active(&self, unit: &str) -> bool {
        Cmd::new("systemctl")
            .args(["is-active", "--quiet", unit])
            .timeout(SERVICE_QUERY_TIMEOUT)
            .succeeds()
            .await
    }

    async fn unit_enabled(&self, unit: &str) -> bool {
        Cmd::new("systemctl")
            .args(["is-enabled", "--quiet", unit])
            .timeout(SERVICE_QUERY_TIMEOUT)
            .succeeds()
            .await
    }

    async fn disable_unit_now(&self, unit: &str) -> Result<()> {
        self.systemctl(&["disable", "--now", unit]).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.systemctl(&["daemon-reload"]).await
    }

    async fn fpm_reload_direct(&self, version: &str) -> Result<()> {
        let bin = self.fpm_binary(version)?;
        self.fpm_config_test(&bin).await?;

        if let Some(pid) = self.live_fpm_master(version) {
            match kill(Pid::from_raw(pid), Signal::SIGUSR2) {
                Ok(()) => {
                    debug!("Sent USR2 to php-fpm {} master {}", version, pid);
                    return Ok(());
                }
                Err(e) => warn!("Failed to signal php-fpm {} master {}: {}", version, pid, e),
            }
        }
        self.fpm_cold_start(&bin, version).await
    }

    async fn fpm_restart_direct(&self, version: &str) -> Result<()> {
        let bin = self.fpm_binary(version)?;
        self.fpm_config_test(&bin).await?;

        if let Some(pid) = self.live_fpm_master(version) {
            let pid = Pid::from_raw(pid);
            if kill(pid, Signal::SIGTERM).is_ok() {
                for _ in 0..50 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if kill(pid, None).is_err() {
                        break;
                    }
                }
            }
            if kill(pid, None).is_ok() {
                warn!("php-fpm {} master {} ignored SIGTERM, sending SIGKILL", version, pid);
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
        self.fpm_cold_start(&bin, version).await
    }

    async fn proxy_running(&self) -> bool {
        if self.has_service_manager().await {
            return self.unit_active(PROXY_UNIT).await;
        }
        !live_pids_named("caddy").is_empty()
    }

    async fn start_proxy(&self) -> Result<()> {
        if self.has_service_manager().await {
            self.reload_or_restart_unit(PROXY_UNIT)
                .await
                .map_err(|e| e.context("failed to restart caddy service"))?;
            info!("Caddy restarted via systemd");
            return Ok(());
        }

        for pid in live_pids_named("caddy") {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let child = tokio::process::Command::new(self.caddy_binary())
            .args(["run", "--config", &self.caddyfile()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AgentError::Command {
                command: format!("{} run --config {}", self.caddy_binary(), self.caddyfile()),
                status: "spawn failed".into(),
                output: e.to_string(),
            })?;
        info!("Caddy started (pid {:?})", child.id());
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(())
    }

    async fn reload_proxy(&self) -> Result<()> {
        if self.has_service_manager().await {
            return self.reload_unit(PROXY_UNIT).await;
        }

        let pids = live_pids_named("caddy");
        if pids.len() > 1 {
            warn!(
                "Multiple caddy processes detected ({:?}); forcing clean restart",
                pids
            );
            return self
                .start_proxy()
                .await
                .map_err(|e| e.context("failed to recover from duplicate caddy processes"));
        }

        Cmd::new(self.caddy_binary())
            .args(["reload", "--config", &self.caddyfile()])
            .timeout(BINARY_TIMEOUT)
            .run()
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests;
