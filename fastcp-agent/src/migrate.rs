//! Startup repairs applied once per process start, before the first pass.
//!
//! Every step checks before it writes, so running the whole sequence on an
//! already-migrated host changes nothing. A step that cannot finish reports
//! [`StepOutcome::Degraded`] and the sequence carries on.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use fastcp_unix::host;
use regex::Regex;
use tracing::{debug, info};

use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::files::{ensure_dir, list_matching, remove_file_if_exists, write_atomic};
use crate::handlers::mysql::{DEFAULT_BUFFER_POOL_MB, DEFAULT_MAX_CONNECTIONS, render_tuning, restart_mysql};
use crate::handlers::php::apt;
use crate::handlers::update::{release_arch, set_executable};
use crate::layout::Layout;
use crate::lifecycle::PROXY_UNIT;
use crate::outcome::StepOutcome;
use crate::tenant::{bootstrap_tenant, known_tenants};

/// Packages backups depend on, keyed by the binary they provide.
const BACKUP_PACKAGES: [(&str, &str); 2] = [("restic", "restic"), ("rsync", "rsync")];

const TMPFILES_FRAGMENT: &str = "fastcp.conf";
const PHP_INI_FILE: &str = "99-fastcp.ini";
const PHP_INI: &str = "display_errors = Off\nerror_reporting = 22527\n";
const MYSQL_HEADER: &str = "# FastCP tuning (default low-resource profile)";

const AGENT_UNIT: &str = "fastcp-agent.service";
const PANEL_UNIT: &str = "fastcp.service";
const PROXY_UNIT_FILE: &str = "fastcp-caddy.service";
const LEGACY_RUNTIME_LINES: [&str; 3] = [
    "RuntimeDirectory=fastcp\n",
    "RuntimeDirectoryMode=1777\n",
    "RuntimeDirectoryPreserve=yes\n",
];
const LEGACY_PANEL_RUN_DIR: &str = "/var/run/fastcp/";

const MOTD_SCRIPT: &str = "99-fastcp";
const MOTD: &str = include_str!("migrate/motd.sh");

const CADDY_DOWNLOAD: &str = "https://caddyserver.com/api/download";
const CADDY_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

const PMA_CONFIG: &str = "config.inc.php";
const PMA_SIGNON: &str = "signon.php";
static BLOWFISH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$cfg\['blowfish_secret'\]\s*=\s*'([^']*)';").expect("valid regex")
});

/// Hosts at or below this much RAM get a swap file.
const SWAP_MAX_RAM_KB: u64 = 2 * 1024 * 1024;
/// Existing swap at or above this is enough.
const SWAP_ENOUGH_KB: u64 = 512 * 1024;
const SWAP_SIZE: &str = "1G";
const SWAP_TIMEOUT: Duration = Duration::from_secs(60);

/// How long a leftover tenant socket gets to accept before it counts as stale.
const STALE_DIAL: Duration = Duration::from_millis(500);

/// Run every step in order. Returns each step's name with its outcome.
pub async fn run_startup_migrations(ctx: &AgentContext) -> Vec<(&'static str, StepOutcome)> {
    info!("Running startup migrations");
    let mut outcomes = Vec::with_capacity(12);

    outcomes.push(("run-dir", ensure_run_dir(&ctx.layout)));
    outcomes.push(("motd", ensure_motd(&ctx.layout)));
    outcomes.push(("caddy-binary", ensure_caddy_binary(ctx).await));
    outcomes.push(("backup-dependencies", ensure_backup_dependencies().await));
    outcomes.push(("php-ini", ensure_php_ini(&ctx.layout)));
    outcomes.push(("service-units", repair_service_units(ctx).await));
    outcomes.push(("phpmyadmin-config", ensure_phpmyadmin_config(&ctx.layout)));
    outcomes.push(("mysql-tuning", ensure_mysql_tuning(ctx).await));
    outcomes.push(("swap", ensure_swap(&ctx.layout).await));
    outcomes.push(("tenants", bootstrap_tenants(&ctx.layout)));
    outcomes.push(("stale-sockets", remove_stale_sockets(ctx).await));
    outcomes.push(("initial-pass", initial_pass(ctx).await));

    for (step, outcome) in &outcomes {
        match outcome {
            StepOutcome::Applied => debug!("Migration step {} applied", step),
            StepOutcome::Degraded(_) => outcome.clone().log(),
        }
    }
    outcomes
}

// ============================================================================
// Steps
// ============================================================================

pub(crate) fn ensure_run_dir(layout: &Layout) -> StepOutcome {
    if let Err(e) = ensure_dir(&layout.run_dir(), 0o755) {
        return StepOutcome::degraded(format!("failed to create run directory: {}", e));
    }
    let fragment = layout.tmpfiles_dir.join(TMPFILES_FRAGMENT);
    match remove_file_if_exists(&fragment) {
        Ok(true) => {
            info!("Removed obsolete tmpfiles fragment {}", fragment.display());
            StepOutcome::Applied
        }
        Ok(false) => StepOutcome::Applied,
        Err(e) => StepOutcome::degraded(format!("failed to remove tmpfiles fragment: {}", e)),
    }
}

/// Login banner script, rewritten only when its content differs.
pub(crate) fn ensure_motd(layout: &Layout) -> StepOutcome {
    if !layout.motd_dir.is_dir() {
        return StepOutcome::Applied;
    }
    let path = layout.motd_dir.join(MOTD_SCRIPT);
    if std::fs::read_to_string(&path).is_ok_and(|current| current == MOTD) {
        return StepOutcome::Applied;
    }
    let result = write_atomic(&path, MOTD.as_bytes(), 0o755);
    if result.is_ok() {
        info!("Wrote login banner {}", path.display());
    }
    StepOutcome::from_result("failed to write login banner", result)
}

pub(crate) fn caddy_download_url(machine: &str) -> String {
    format!("{}?os=linux&arch={}", CADDY_DOWNLOAD, release_arch(machine))
}

/// Fetch a plain Caddy build and move it into place.
async fn install_caddy(dest: &Path) -> Result<()> {
    let dir = dest.parent().unwrap_or(Path::new("/"));
    ensure_dir(dir, 0o755)?;
    let machine = host::uname().map(|u| u.machine).unwrap_or_default();
    let url = caddy_download_url(&machine);

    // Staged in the destination directory so the rename stays on one filesystem.
    let staged = tempfile::Builder::new()
        .prefix(".fastcp-caddy-")
        .tempfile_in(dir)
        .map_err(|e| AgentError::io("create temp file in", dir, e))?;
    Cmd::new("curl")
        .args(["-fsSL", "-o"])
        .arg(staged.path().display().to_string())
        .arg(url.as_str())
        .timeout(CADDY_DOWNLOAD_TIMEOUT)
        .run()
        .await
        .map_err(|e| e.context(format!("failed to download {}", url)))?;
    let size = staged
        .as_file()
        .metadata()
        .map_err(|e| AgentError::io("stat", staged.path(), e))?
        .len();
    if size == 0 {
        return Err(AgentError::Operation(format!("download from {} is empty", url)));
    }
    set_executable(staged.path())?;
    staged
        .persist(dest)
        .map_err(|e| AgentError::io("install", dest, e.error))?;
    Ok(())
}

async fn ensure_caddy_binary(ctx: &AgentContext) -> StepOutcome {
    let dest = &ctx.layout.caddy_binary;
    if dest.exists() {
        return StepOutcome::Applied;
    }
    info!("Caddy binary missing at {}, downloading", dest.display());
    if let Err(e) = install_caddy(dest).await {
        return StepOutcome::degraded(format!("failed to install Caddy binary: {}", e));
    }
    info!("Installed Caddy binary {}", dest.display());
    if !ctx.controller.has_service_manager().await {
        return StepOutcome::Applied;
    }
    StepOutcome::from_result(
        "Caddy installed but proxy restart failed",
        ctx.controller.reload_or_restart_unit(PROXY_UNIT).await,
    )
}

/// Packages whose binary `present` does not find, sorted.
pub(crate) fn missing_packages(present: impl Fn(&str) -> bool) -> Vec<&'static str> {
    let mut missing: Vec<&'static str> = BACKUP_PACKAGES
        .iter()
        .filter(|(bin, _)| !present(bin))
        .map(|(_, pkg)| *pkg)
        .collect();
    missing.sort_unstable();
    missing
}

async fn install_packages(pkgs: &[&str]) -> Result<()> {
    apt(&["update", "-qq"])
        .run()
        .await
        .map_err(|e| e.context("failed to update apt indexes for backup dependencies"))?;
    let mut args = vec!["install", "-y", "-qq"];
    args.extend_from_slice(pkgs);
    apt(&args).run().await.map_err(|e| {
        e.context(format!("failed to install backup dependencies ({})", pkgs.join(", ")))
    })?;
    Ok(())
}

async fn ensure_backup_dependencies() -> StepOutcome {
    let missing = missing_packages(|bin| which::which(bin).is_ok());
    if missing.is_empty() {
        return StepOutcome::Applied;
    }
    let result = install_packages(&missing).await;
    if result.is_ok() {
        info!("Installed missing backup dependencies: {}", missing.join(","));
    }
    StepOutcome::from_result("failed to ensure backup dependencies", result)
}

pub(crate) fn ensure_php_ini(layout: &Layout) -> StepOutcome {
    let dir = layout.php_ini_dir();
    let ini = dir.join(PHP_INI_FILE);
    if ini.exists() {
        return StepOutcome::Applied;
    }
    let result = ensure_dir(&dir, 0o755)
        .and_then(|_| write_atomic(&ini, PHP_INI.as_bytes(), 0o644))
        .and_then(|_| remove_file_if_exists(&layout.phpmyadmin_dir().join(".user.ini")));
    if result.is_ok() {
        info!("Created PHP ini config {}", ini.display());
    }
    StepOutcome::from_result("failed to create PHP ini config", result)
}

/// Agent unit without the runtime directory lines, `None` when already clean.
pub(crate) fn repair_agent_unit(text: &str) -> Option<String> {
    if !text.contains("RuntimeDirectory=") {
        return None;
    }
    let mut out = text.to_string();
    for line in LEGACY_RUNTIME_LINES {
        out = out.replacen(line, "", 1);
    }
    (out != text).then_some(out)
}

/// Panel unit pointing at `run_dir` instead of the old runtime directory.
pub(crate) fn repair_panel_unit(text: &str, run_dir: &Path) -> Option<String> {
    if !text.contains(LEGACY_PANEL_RUN_DIR) {
        return None;
    }
    let target = format!("{}/", run_dir.display());
    Some(text.replace(LEGACY_PANEL_RUN_DIR, &target))
}

/// Proxy unit with a reload command and without the stale PHP ini scan dir.
pub(crate) fn repair_proxy_unit(text: &str, layout: &Layout) -> Option<String> {
    let stale_env = format!(
        "Environment=PHP_INI_SCAN_DIR=:{}\n",
        layout.php_ini_dir().display()
    );
    let reload = format!(
        "ExecReload={} reload --config {}",
        layout.caddy_binary.display(),
        layout.caddyfile().display()
    );
    let mut out = text.replace(&stale_env, "");
    if !out.contains(&reload) {
        out = out.replacen("RestartSec=5\n", &format!("RestartSec=5\n{}\n", reload), 1);
    }
    (out != text).then_some(out)
}

fn rewrite_unit(path: &Path, repair: impl Fn(&str) -> Option<String>) -> Result<bool> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(AgentError::io("read", path, e)),
    };
    match repair(&text) {
        Some(fixed) => {
            write_atomic(path, fixed.as_bytes(), 0o644)?;
            info!("Repaired unit file {}", path.display());
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn repair_service_units(ctx: &AgentContext) -> StepOutcome {
    let layout = &ctx.layout;
    let managed = ctx.controller.has_service_manager().await;
    let mut changed = false;
    let mut failures = Vec::new();

    let run_dir = layout.run_dir();
    let rewrites = [
        rewrite_unit(&layout.unit_file(AGENT_UNIT), repair_agent_unit),
        rewrite_unit(&layout.unit_file(PANEL_UNIT), |t: &str| repair_panel_unit(t, &run_dir)),
        rewrite_unit(&layout.unit_file(PROXY_UNIT_FILE), |t: &str| repair_proxy_unit(t, layout)),
    ];
    for result in rewrites {
        match result {
            Ok(c) => changed |= c,
            Err(e) => failures.push(e.to_string()),
        }
    }

    let legacy = list_matching(&layout.systemd_dir, |name| {
        name.starts_with("fastcp-php@") && name.ends_with(".service")
    });
    for path in legacy {
        let Some(unit) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if managed && let Err(e) = ctx.controller.disable_unit_now(unit).await {
            debug!("disable {} failed: {}", unit, e);
        }
        match remove_file_if_exists(&path) {
            Ok(_) => {
                info!("Removed legacy per-user PHP unit {}", unit);
                changed = true;
            }
            Err(e) => failures.push(e.to_string()),
        }
    }

    if changed && managed && let Err(e) = ctx.controller.daemon_reload().await {
        failures.push(format!("daemon-reload: {}", e));
    }
    if failures.is_empty() {
        StepOutcome::Applied
    } else {
        StepOutcome::degraded(format!("service unit repair incomplete: {}", failures.join("; ")))
    }
}

/// Blowfish secret of an existing phpMyAdmin config, if it has a non-empty one.
pub(crate) fn existing_blowfish(text: &str) -> Option<&str> {
    text.lines()
        .find_map(|line| BLOWFISH.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|secret| !secret.is_empty())
}

/// phpMyAdmin config using HTTP basic credentials as MySQL login.
pub(crate) fn render_pma_config(secret: &str, tmp_dir: &Path) -> String {
    format!(
        r#"<?php
$cfg['blowfish_secret'] = '{secret}';
$cfg['TempDir'] = '{tmp}';
$cfg['UploadDir'] = '';
$cfg['SaveDir'] = '';

$cfg['Servers'][1]['host'] = '127.0.0.1';
$cfg['Servers'][1]['auth_type'] = 'config';
$cfg['Servers'][1]['user'] = $_SERVER['PHP_AUTH_USER'] ?? '';
$cfg['Servers'][1]['password'] = $_SERVER['PHP_AUTH_PW'] ?? '';
$cfg['Servers'][1]['AllowNoPassword'] = false;
$cfg['Servers'][1]['hide_db'] = '^(information_schema|performance_schema|mysql|sys)$';

$cfg['ShowCreateDb'] = false;
$cfg['LoginCookieValidity'] = 3600;
$cfg['LoginCookieStore'] = 0;
$cfg['LoginCookieDeleteAll'] = true;
"#,
        secret = secret,
        tmp = tmp_dir.display(),
    )
}

fn new_blowfish() -> Result<String> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AgentError::Internal(format!("random source unavailable: {}", e)))?;
    Ok(hex::encode(bytes))
}

pub(crate) fn ensure_phpmyadmin_config(layout: &Layout) -> StepOutcome {
    let dir = layout.phpmyadmin_dir();
    if !dir.is_dir() {
        return StepOutcome::Applied;
    }
    let path = dir.join(PMA_CONFIG);
    let current = std::fs::read_to_string(&path).ok();
    let secret = match current.as_deref().and_then(existing_blowfish) {
        Some(secret) => secret.to_string(),
        None => match new_blowfish() {
            Ok(secret) => secret,
            Err(e) => return StepOutcome::degraded(format!("failed to write phpMyAdmin config: {}", e)),
        },
    };
    let text = render_pma_config(&secret, &layout.admin_tmp_dir());
    if current.as_deref() != Some(text.as_str()) {
        if let Err(e) = write_atomic(&path, text.as_bytes(), 0o644) {
            return StepOutcome::degraded(format!("failed to write phpMyAdmin config: {}", e));
        }
        info!("Wrote phpMyAdmin config {}", path.display());
    }
    StepOutcome::from_result(
        "failed to remove phpMyAdmin signon entrypoint",
        remove_file_if_exists(&dir.join(PMA_SIGNON)),
    )
}

fn meminfo_kb(text: &str, field: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.strip_prefix(field).is_some_and(|r| r.starts_with(':')))?;
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Small hosts without meaningful swap get a swap file.
pub(crate) fn needs_swap(meminfo: &str) -> bool {
    let Some(total) = meminfo_kb(meminfo, "MemTotal") else {
        return false;
    };
    let swap = meminfo_kb(meminfo, "SwapTotal").unwrap_or(0);
    total <= SWAP_MAX_RAM_KB && swap < SWAP_ENOUGH_KB
}

/// Append the swap file to fstab unless it is already listed. Returns whether it wrote.
pub(crate) fn ensure_fstab_entry(fstab: &Path, swap_file: &Path) -> Result<bool> {
    let text = std::fs::read_to_string(fstab).map_err(|e| AgentError::io("read", fstab, e))?;
    let file = swap_file.display().to_string();
    if text.split_whitespace().any(|field| field == file) {
        return Ok(false);
    }
    let mut out = text;
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("{} none swap sw 0 0\n", file));
    write_atomic(fstab, out.as_bytes(), 0o644)?;
    Ok(true)
}

async fn enable_swap(layout: &Layout) -> Result<()> {
    let file = layout.swap_file.display().to_string();
    if !layout.swap_file.exists() {
        Cmd::new("fallocate")
            .args(["-l", SWAP_SIZE, file.as_str()])
            .timeout(SWAP_TIMEOUT)
            .run()
            .await?;
        std::fs::set_permissions(&layout.swap_file, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| AgentError::io("chmod", &layout.swap_file, e))?;
        Cmd::new("mkswap").arg(file.as_str()).timeout(SWAP_TIMEOUT).run().await?;
    }
    // Already active is reported as failure.
    if let Err(e) = Cmd::new("swapon").arg(file.as_str()).timeout(SWAP_TIMEOUT).run().await {
        debug!("swapon {}: {}", file, e);
    }
    if ensure_fstab_entry(&layout.fstab, &layout.swap_file)? {
        info!("Added {} to {}", file, layout.fstab.display());
    }
    Ok(())
}

async fn ensure_swap(layout: &Layout) -> StepOutcome {
    let Ok(meminfo) = std::fs::read_to_string(&layout.meminfo) else {
        return StepOutcome::Applied;
    };
    if !needs_swap(&meminfo) {
        return StepOutcome::Applied;
    }
    let result = enable_swap(layout).await;
    if result.is_ok() {
        info!("Ensured swap is active at {}", layout.swap_file.display());
    }
    StepOutcome::from_result("failed to enable swap", result)
}

async fn ensure_mysql_tuning(ctx: &AgentContext) -> StepOutcome {
    let path = ctx.layout.mysql_tuning_file();
    if path.exists() {
        return StepOutcome::Applied;
    }
    let text = render_tuning(MYSQL_HEADER, DEFAULT_BUFFER_POOL_MB, DEFAULT_MAX_CONNECTIONS, false);
    let written = ensure_dir(&ctx.layout.mysql_conf_dir, 0o755)
        .and_then(|_| write_atomic(&path, text.as_bytes(), 0o644));
    if let Err(e) = written {
        return StepOutcome::degraded(format!("failed to write MySQL tuning: {}", e));
    }
    info!(
        "Applied MySQL tuning (low-resource default): buffer_pool_mb={} max_connections={}",
        DEFAULT_BUFFER_POOL_MB, DEFAULT_MAX_CONNECTIONS
    );
    StepOutcome::from_result(
        "MySQL tuning written but restart failed",
        restart_mysql(ctx.controller.as_ref()).await,
    )
}

fn is_legacy_shared(name: &str) -> bool {
    name.starts_with("php-") && (name.ends_with(".sock") || name.ends_with(".pid"))
}

pub(crate) fn bootstrap_tenants(layout: &Layout) -> StepOutcome {
    let mut failures = Vec::new();
    let legacy = list_matching(&layout.run_dir(), is_legacy_shared);
    if !legacy.is_empty() {
        info!("Removing {} legacy shared socket files", legacy.len());
    }
    for path in legacy {
        if let Err(e) = remove_file_if_exists(&path) {
            failures.push(e.to_string());
        }
    }
    for username in known_tenants(layout) {
        if let Err(e) = bootstrap_tenant(layout, &username) {
            failures.push(format!("{}: {}", username, e));
        }
    }
    if failures.is_empty() {
        StepOutcome::Applied
    } else {
        StepOutcome::degraded(format!("tenant bootstrap incomplete: {}", failures.join("; ")))
    }
}

fn is_pool_socket(name: &str) -> bool {
    name.starts_with("php") && name.ends_with(".sock")
}

/// Remove tenant pool sockets nothing is listening on. Returns the removed paths.
pub(crate) async fn stale_sockets(ctx: &AgentContext) -> Result<Vec<std::path::PathBuf>> {
    let mut removed = Vec::new();
    for username in known_tenants(&ctx.layout) {
        let run_dir = ctx.layout.tenant_run_dir(&username);
        for sock in list_matching(&run_dir, is_pool_socket) {
            if ctx.controller.connect_unix_socket(&sock, STALE_DIAL).await.is_ok() {
                continue;
            }
            if remove_file_if_exists(&sock)? {
                info!("Removed stale socket {}", sock.display());
                removed.push(sock);
            }
        }
        remove_file_if_exists(&run_dir.join("php.pid"))?;
    }
    Ok(removed)
}

async fn remove_stale_sockets(ctx: &AgentContext) -> StepOutcome {
    StepOutcome::from_result("failed to clean stale sockets", stale_sockets(ctx).await)
}

async fn initial_pass(ctx: &AgentContext) -> StepOutcome {
    match ctx.reconcile().await {
        Ok(report) => {
            info!(
                "Initial reconciliation: {} sites, proxy {}",
                report.sites, report.proxy_action
            );
            StepOutcome::Applied
        }
        Err(e) => StepOutcome::degraded(format!("initial reconciliation failed: {}", e)),
    }
}

#[cfg(test)]
mod tests;
