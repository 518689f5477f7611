//! `system.update`: replace the panel and agent binaries with a release build.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fastcp_protocol::payload::PerformUpdate;
use fastcp_unix::host;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::params;
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};

const RELEASES: &str = "https://github.com/rehmatworks/fastcp/releases";
const PANEL_UNIT: &str = "fastcp";
const AGENT_UNIT: &str = "fastcp-agent";

/// Grace period before the agent restarts itself, so the reply is delivered.
const SELF_RESTART_DELAY: Duration = Duration::from_secs(1);

pub(crate) fn release_arch(machine: &str) -> &'static str {
    match machine {
        "aarch64" | "arm64" => "arm64",
        _ => "amd64",
    }
}

pub(super) fn release_base(version: &str) -> String {
    if version == "latest" {
        format!("{}/latest/download", RELEASES)
    } else {
        format!("{}/download/{}", RELEASES, version)
    }
}

/// `(download url, installed path)` for each binary in a release.
pub(super) fn release_assets(bin_dir: &Path, version: &str, arch: &str) -> Vec<(String, PathBuf)> {
    let base = release_base(version);
    [("fastcp", PANEL_UNIT), ("fastcp-agent", AGENT_UNIT)]
        .into_iter()
        .map(|(asset, bin)| (format!("{}/{}-linux-{}", base, asset, arch), bin_dir.join(bin)))
        .collect()
}

/// Swap `staged` into `dest`, keeping the old binary until the rename lands.
fn install_binary(staged: &Path, dest: &Path) -> Result<()> {
    let backup = dest.with_extension("bak");
    let had_old = std::fs::rename(dest, &backup).is_ok();
    if let Err(e) = std::fs::rename(staged, dest) {
        if had_old {
            let _ = std::fs::rename(&backup, dest);
        }
        return Err(AgentError::io("install", dest, e));
    }
    if had_old {
        let _ = std::fs::remove_file(&backup);
    }
    Ok(())
}

pub async fn perform(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: PerformUpdate = params(&raw)?;
    let version = match req.target_version.trim() {
        "" => "latest".to_string(),
        v => v.to_string(),
    };
    info!("Performing system update to {}", version);

    let machine = host::uname().map(|u| u.machine).unwrap_or_default();
    let bin_dir = ctx.layout.fastcp_root.join("bin");
    let assets = release_assets(&bin_dir, &version, release_arch(&machine));

    // Staged next to the destination so the final rename stays on one filesystem.
    std::fs::create_dir_all(&bin_dir).map_err(|e| AgentError::io("create", &bin_dir, e))?;
    let staging = tempfile::Builder::new()
        .prefix(".fastcp-update-")
        .tempdir_in(&bin_dir)
        .map_err(|e| AgentError::io("create staging dir in", &bin_dir, e))?;

    let mut staged = Vec::with_capacity(assets.len());
    for (url, dest) in &assets {
        let Some(name) = dest.file_name() else {
            continue;
        };
        let tmp = staging.path().join(name);
        Cmd::new("curl")
            .args(["-fsSL", url.as_str(), "-o"])
            .arg(tmp.display().to_string())
            .run()
            .await
            .map_err(|e| e.context(format!("failed to download {}", url)))?;
        set_executable(&tmp)?;
        staged.push((tmp, dest.clone()));
    }

    let controller = ctx.controller.clone();
    if let Err(e) = Cmd::new("systemctl").args(["stop", PANEL_UNIT]).run().await {
        warn!("Failed to stop {}: {}", PANEL_UNIT, e);
    }
    for (tmp, dest) in &staged {
        install_binary(tmp, dest)?;
    }
    if let Err(e) = Cmd::new("systemctl").args(["start", PANEL_UNIT]).run().await {
        warn!("Failed to start {}: {}", PANEL_UNIT, e);
    }

    tokio::spawn(async move {
        tokio::time::sleep(SELF_RESTART_DELAY).await;
        if let Err(e) = controller.restart_unit(AGENT_UNIT).await {
            warn!("Failed to restart {}: {}", AGENT_UNIT, e);
        }
    });

    info!("System update to {} installed", version);
    Ok(json!({ "status": "ok", "version": version }))
}

pub(crate) fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(|e| AgentError::io("chmod", path, e))
}
