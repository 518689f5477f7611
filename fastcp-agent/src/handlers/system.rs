//! Host facts, service states and the rclone helper.

use std::path::Path;
use std::sync::Arc;

use fastcp_protocol::payload::{RcloneStatus, ServiceStatus, SystemStatus};
use fastcp_unix::host;
use serde_json::Value;
use tracing::{debug, info};

use super::php::apt;
use super::to_value;
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::lifecycle::PROXY_UNIT;
use crate::php::{available_versions, installed_fpm_units, resolve_default_version};

const OS_RELEASE: &str = "/etc/os-release";

/// Total and used memory in bytes from `/proc/meminfo` text.
///
/// Used memory follows `free`: total minus free, buffers and reclaimable
/// cache, plus shared memory. Falls back to `MemAvailable` when the detailed
/// fields are missing.
pub(super) fn memory_usage(meminfo: &str) -> (u64, u64) {
    let field = |name: &str| -> u64 {
        meminfo
            .lines()
            .find_map(|l| l.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next()?.parse::<u64>().ok())
            .map_or(0, |kb| kb * 1024)
    };
    let total = field("MemTotal");
    if total == 0 {
        return (0, 0);
    }
    let (free, buffers, cached, reclaimable, shmem) = (
        field("MemFree"),
        field("Buffers"),
        field("Cached"),
        field("SReclaimable"),
        field("Shmem"),
    );
    let available = field("MemAvailable");

    let used = if free > 0 || buffers > 0 || cached > 0 || reclaimable > 0 || shmem > 0 {
        let cache = buffers + cached + reclaimable;
        if total > free + cache { total - free - cache + shmem } else { 0 }
    } else if available > 0 && total >= available {
        total - available
    } else {
        0
    };
    (total, used.min(total))
}

pub(super) fn pretty_os_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|l| l.strip_prefix("PRETTY_NAME="))
        .map(|v| v.trim_matches('"').to_string())
}

/// The token after `Ver` in `mysql --version` output.
pub(super) fn mysql_version(output: &str) -> Option<String> {
    let mut parts = output.split_whitespace();
    parts.find(|p| *p == "Ver")?;
    parts.next().map(str::to_string)
}

async fn first_field(cmd: Cmd) -> String {
    cmd.stdout()
        .await
        .and_then(|out| out.split_whitespace().next().map(str::to_string))
        .unwrap_or_default()
}

pub async fn status(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let layout = &ctx.layout;
    let uname = host::uname().unwrap_or_default();
    let load = host::load().unwrap_or_default();
    let disk = host::disk_usage(Path::new("/")).unwrap_or_default();
    let (memory_total, memory_used) =
        memory_usage(&std::fs::read_to_string(&layout.meminfo).unwrap_or_default());

    let os = std::fs::read_to_string(OS_RELEASE)
        .ok()
        .and_then(|text| pretty_os_name(&text))
        .unwrap_or_else(|| "Linux".to_string());

    let mysql = Cmd::new("mysql")
        .arg("--version")
        .stdout()
        .await
        .and_then(|out| mysql_version(&out))
        .unwrap_or_default();
    let caddy = first_field(Cmd::new(layout.caddy_binary.display().to_string()).arg("version")).await;

    let available = available_versions(layout);
    let counts = ctx.store.counts().await.unwrap_or_else(|e| {
        debug!("Site counts unavailable: {}", e);
        Default::default()
    });

    to_value(&SystemStatus {
        hostname: uname.nodename,
        os,
        uptime: load.uptime_secs,
        load_average: load.load1,
        memory_total,
        memory_used,
        disk_total: disk.total,
        disk_used: disk.used,
        php_version: resolve_default_version(layout, &available).await,
        mysql_version: mysql,
        caddy_version: caddy,
        php_available_versions: available,
        kernel_version: uname.release,
        architecture: uname.machine,
        total_users: counts.users,
        total_websites: counts.sites,
        total_databases: counts.databases,
    })
}

pub async fn services(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let controller = ctx.controller.as_ref();
    let mut units = vec![PROXY_UNIT.to_string()];
    units.extend(installed_fpm_units(&ctx.layout).into_values());
    units.extend(["mysql", "ssh", "fastcp", "fastcp-agent"].map(String::from));

    let mut result = Vec::with_capacity(units.len());
    for unit in units {
        let running = controller.unit_active(&unit).await;
        result.push(ServiceStatus {
            enabled: controller.unit_enabled(&unit).await,
            status: if running { "running" } else { "stopped" }.to_string(),
            name: unit,
        });
    }
    to_value(&result)
}

async fn detect_rclone() -> RcloneStatus {
    let Some(path) = which::which("rclone").ok() else {
        return RcloneStatus::default();
    };
    let path = path.display().to_string();
    let version = Cmd::new(path.clone())
        .arg("version")
        .stdout()
        .await
        .and_then(|out| out.lines().next().map(|l| l.trim().to_string()))
        .unwrap_or_default();
    RcloneStatus { installed: true, version, path }
}

pub async fn rclone_status(_ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    to_value(&detect_rclone().await)
}

pub async fn install_rclone(_ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let current = detect_rclone().await;
    if current.installed {
        return to_value(&current);
    }
    apt(&["update", "-qq"])
        .run()
        .await
        .map_err(|e| e.context("failed to update apt indexes"))?;
    apt(&["install", "-y", "-qq", "rclone"])
        .run()
        .await
        .map_err(|e| e.context("failed to install rclone"))?;

    let installed = detect_rclone().await;
    if !installed.installed {
        return Err(AgentError::Operation(
            "rclone installation finished but binary is still not available".into(),
        ));
    }
    info!("Installed rclone {}", installed.version);
    to_value(&installed)
}
