//! `user.*`: OS accounts backing tenants, and their resource slices.

use std::path::Path;
use std::sync::Arc;

use fastcp_protocol::payload::{CreateUser, DeleteUser, UpdateUserLimits};
use serde_json::Value;
use tracing::{info, warn};

use super::database::delete_tenant_databases;
use super::{ok, params, require_account, validate_username};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::files::{ensure_dir, remove_file_if_exists, write_atomic};
use crate::tenant::bootstrap_tenant;

const SLICE_DROPIN: &str = "50-fastcp-limits.conf";
const DEFAULT_MEMORY_MB: i64 = 512;
const DEFAULT_CPU_PERCENT: i64 = 100;

pub(super) fn initial_caddyfile(username: &str) -> String {
    format!(
        "# FastCP user config for {username}\n\
         {{\n    admin off\n}}\n\n\
         # Sites will be added here by FastCP\n"
    )
}

/// Slice drop-in capping every process of `uid`. Zero means the default,
/// negative means unlimited.
pub(super) fn render_slice(username: &str, uid: u32, memory_mb: i64, cpu_percent: i64) -> String {
    let memory = match memory_mb {
        0 => format!("MemoryMax={}M", DEFAULT_MEMORY_MB),
        m if m < 0 => "MemoryMax=infinity".to_string(),
        m => format!("MemoryMax={}M", m),
    };
    let cpu = match cpu_percent {
        0 => format!("CPUQuota={}%", DEFAULT_CPU_PERCENT),
        c if c < 0 => "CPUQuota=infinity".to_string(),
        c => format!("CPUQuota={}%", c),
    };
    format!(
        "# FastCP resource limits for user: {username} (UID: {uid})\n\
         # These limits apply to ALL processes by this user:\n\
         # - PHP-FPM pools for this user\n\
         # - SSH sessions\n\
         # - Cron jobs\n\
         # - Any other processes\n\
         \n\
         [Slice]\n\
         {memory}\n\
         {cpu}\n"
    )
}

pub(super) fn validate_limits(memory_mb: i64, cpu_percent: i64) -> Result<()> {
    if memory_mb != -1 && !(128..=262144).contains(&memory_mb) {
        return Err(AgentError::Validation(
            "memory_mb must be -1 (unlimited) or between 128 and 262144".into(),
        ));
    }
    if cpu_percent != -1 && !(10..=4000).contains(&cpu_percent) {
        return Err(AgentError::Validation(
            "cpu_percent must be -1 (unlimited) or between 10 and 4000".into(),
        ));
    }
    Ok(())
}

async fn write_slice(ctx: &AgentContext, username: &str, uid: u32, memory_mb: i64, cpu_percent: i64) -> Result<()> {
    let dir = ctx.layout.user_slice_dir(uid);
    ensure_dir(&dir, 0o755).map_err(|e| e.context("failed to create slice directory"))?;
    let text = render_slice(username, uid, memory_mb, cpu_percent);
    write_atomic(&dir.join(SLICE_DROPIN), text.as_bytes(), 0o644)
        .map_err(|e| e.context("failed to write slice override"))?;
    daemon_reload(ctx).await;
    info!(
        "Wrote resource slice for {} (uid {}): memory_mb={} cpu_percent={}",
        username, uid, memory_mb, cpu_percent
    );
    Ok(())
}

async fn daemon_reload(ctx: &AgentContext) {
    let controller = ctx.controller.as_ref();
    if controller.has_service_manager().await
        && let Err(e) = controller.daemon_reload().await
    {
        warn!("systemctl daemon-reload failed: {}", e);
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AgentError::io("remove", path, e)),
    }
}

pub async fn create(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: CreateUser = params(&raw)?;
    validate_username(&req.username)?;
    if req.password.contains(['\n', ':']) {
        return Err(AgentError::Validation("password must not contain ':' or newlines".into()));
    }
    info!(
        "Creating user {} (memory_mb={} cpu_percent={})",
        req.username, req.memory_mb, req.cpu_percent
    );

    Cmd::new("useradd")
        .args(["-m", "-s", "/bin/bash", req.username.as_str()])
        .run()
        .await
        .map_err(|e| e.context("failed to create user"))?;
    Cmd::new("chpasswd")
        .stdin(format!("{}:{}", req.username, req.password))
        .run()
        .await
        .map_err(|e| e.context("failed to set password"))?;

    bootstrap_tenant(&ctx.layout, &req.username)?;
    let acct = require_account(&req.username)?;

    let caddyfile = ctx.layout.tenant_config_dir(&req.username).join("Caddyfile");
    write_atomic(&caddyfile, initial_caddyfile(&req.username).as_bytes(), 0o644)?;

    if let Err(e) = write_slice(&ctx, &req.username, acct.uid, req.memory_mb, req.cpu_percent).await {
        warn!("Failed to create resource slice for {}: {}", req.username, e);
    }

    ctx.reconcile()
        .await
        .map_err(|e| e.context("failed to reconcile after user create"))?;
    Ok(ok())
}

pub async fn update_limits(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: UpdateUserLimits = params(&raw)?;
    if req.username.is_empty() {
        return Err(AgentError::Validation("username is required".into()));
    }
    validate_username(&req.username)?;
    validate_limits(req.memory_mb, req.cpu_percent)?;

    let acct = require_account(&req.username)?;
    write_slice(&ctx, &req.username, acct.uid, req.memory_mb, req.cpu_percent)
        .await
        .map_err(|e| e.context("failed to update user resource limits"))?;

    ctx.reconcile()
        .await
        .map_err(|e| e.context("failed to reconcile after limit update"))?;
    Ok(ok())
}

pub async fn delete(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: DeleteUser = params(&raw)?;
    validate_username(&req.username)?;
    info!("Deleting user {}", req.username);

    let username = req.username.as_str();
    let acct = fastcp_unix::account::lookup(username);

    delete_tenant_databases(&ctx, username)
        .await
        .map_err(|e| e.context("failed to delete user databases"))?;

    let cron = Cmd::new("crontab").args(["-r", "-u", username]).output().await?;
    if !cron.success && !cron.combined().to_ascii_lowercase().contains("no crontab") {
        return Err(AgentError::Operation(format!(
            "failed to remove crontab for {}: {}",
            username,
            cron.combined()
        )));
    }

    // Per-tenant PHP units from older releases.
    let legacy_unit = format!("fastcp-php@{}.service", username);
    if ctx.controller.has_service_manager().await {
        let _ = ctx.controller.disable_unit_now(&legacy_unit).await;
    }
    remove_file_if_exists(&ctx.layout.unit_file(&legacy_unit))?;

    if let Some(acct) = &acct {
        remove_dir_if_exists(&ctx.layout.user_slice_dir(acct.uid))?;
    }
    daemon_reload(&ctx).await;

    remove_dir_if_exists(&ctx.layout.tenant_config_dir(username))?;

    if acct.is_some() {
        Cmd::new("userdel")
            .args(["-r", username])
            .run()
            .await
            .map_err(|e| e.context("failed to delete user"))?;
    } else {
        warn!("No OS account for {}; skipping userdel", username);
    }

    ctx.reconcile()
        .await
        .map_err(|e| e.context("failed to reconcile after user delete"))?;
    Ok(ok())
}
