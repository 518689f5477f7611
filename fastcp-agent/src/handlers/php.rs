//! PHP runtimes: the default version for new sites and on-demand installs.

use std::sync::Arc;

use fastcp_protocol::payload::{InstallPhpVersion, PhpDefaultConfig};
use serde_json::{Value, json};
use tracing::info;

use super::{ok, params, to_value};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::php::{available_versions, normalize_version, resolve_default_version, resolve_fpm_unit};
use crate::settings::save_php_default;

const MODULES: [&str; 21] = [
    "bcmath", "bz2", "cli", "common", "curl", "gd", "gmp", "igbinary", "imagick", "imap", "intl",
    "mbstring", "mysql", "opcache", "readline", "redis", "soap", "sqlite3", "xml", "xmlrpc", "zip",
];

pub(crate) fn apt(args: &[&str]) -> Cmd {
    Cmd::new("apt-get")
        .args(args.iter().copied())
        .env("DEBIAN_FRONTEND", "noninteractive")
        .env("NEEDRESTART_SUSPEND", "1")
}

async fn package_exists(pkg: &str) -> bool {
    Cmd::new("apt-cache").args(["show", pkg]).succeeds().await
}

/// Packages to install for `version`; the FPM package is mandatory, modules
/// are added when the repositories carry them.
async fn installable_packages(version: &str) -> Result<Vec<String>> {
    let fpm = format!("php{}-fpm", version);
    let mut pkgs = Vec::new();
    for pkg in [format!("php{}", version), fpm.clone()] {
        if package_exists(&pkg).await {
            pkgs.push(pkg);
        }
    }
    if !pkgs.contains(&fpm) {
        return Err(AgentError::Operation(format!(
            "{} is not available in apt repositories",
            fpm
        )));
    }
    for module in MODULES {
        let pkg = format!("php{}-{}", version, module);
        if package_exists(&pkg).await {
            pkgs.push(pkg);
        }
    }
    Ok(pkgs)
}

/// A version string accepted for install: already in `X.Y` form.
pub(super) fn install_target(raw: &str) -> Result<String> {
    let version = normalize_version(raw)
        .ok_or_else(|| AgentError::Validation(format!("invalid php version format: {:?}", raw)))?;
    if version != raw.trim() {
        return Err(AgentError::Validation(format!("unsupported php version {:?}", raw)));
    }
    Ok(version)
}

pub async fn get_default(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let available = available_versions(&ctx.layout);
    to_value(&PhpDefaultConfig {
        default_php_version: resolve_default_version(&ctx.layout, &available).await,
        available_php_versions: available,
    })
}

pub async fn set_default(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: PhpDefaultConfig = params(&raw)?;
    let requested = normalize_version(&req.default_php_version).ok_or_else(|| {
        AgentError::Validation(format!(
            "invalid php version format: {:?}",
            req.default_php_version
        ))
    })?;
    if !available_versions(&ctx.layout).contains(&requested) {
        return Err(AgentError::Validation(format!(
            "php version {} is not installed on this server",
            requested
        )));
    }
    save_php_default(&ctx.layout, &requested)?;
    info!("Default PHP version set to {}", requested);
    Ok(ok())
}

async fn start_fpm(ctx: &AgentContext, version: &str) -> Result<()> {
    let controller = ctx.controller.as_ref();
    if controller.has_service_manager().await {
        let unit = resolve_fpm_unit(&ctx.layout, version)?;
        let _ = controller.enable_unit(&unit).await;
        controller.reload_or_restart_unit(&unit).await
    } else {
        controller.fpm_reload_direct(version).await
    }
}

pub async fn install_version(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: InstallPhpVersion = params(&raw)?;
    let version = install_target(&req.version)?;

    if available_versions(&ctx.layout).contains(&version) {
        return Ok(json!({ "status": "ok", "message": "php version already installed" }));
    }

    apt(&["update", "-qq"])
        .run()
        .await
        .map_err(|e| e.context("failed to update apt indexes"))?;
    let pkgs = installable_packages(&version).await?;
    let mut args = vec!["install", "-y", "-qq"];
    args.extend(pkgs.iter().map(String::as_str));
    apt(&args)
        .run()
        .await
        .map_err(|e| e.context(format!("failed to install php{} packages", version)))?;

    start_fpm(&ctx, &version).await?;
    ctx.reconcile()
        .await
        .map_err(|e| e.context("failed to reconcile after php install"))?;

    info!("Installed PHP {} on demand", version);
    Ok(json!({ "status": "ok", "message": "php version installed" }))
}
