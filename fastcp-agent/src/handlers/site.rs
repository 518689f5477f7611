//! `site.*`: site directories and WordPress installs.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use fastcp_protocol::payload::{
    CreateSiteDirectory, DeleteSiteDirectory, InstallWordPress, WordPressInstalled,
};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::database::{self, validate_identifier};
use super::{ok, params, random_string, require_account, to_value, validate_username};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::files::{chown_recursive, ensure_dir, write_atomic};
use crate::layout::Layout;
use crate::tenant::bootstrap_tenant;

const WORDPRESS_URL: &str = "https://wordpress.org/latest.tar.gz";

/// Characters used for WordPress keys and salts; none needs escaping inside
/// a single-quoted PHP string.
const SALT_CHARSET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*()-_=+[]{}|;:,.<>?";
const PASSWORD_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `~/apps/<slug>`, rejecting slugs that are not one plain path component.
pub(super) fn site_dir(layout: &Layout, username: &str, slug: &str) -> Result<PathBuf> {
    let mut parts = Path::new(slug).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(_)), None) if !slug.contains('/') => {
            Ok(layout.tenant_apps_dir(username).join(slug))
        }
        _ => Err(AgentError::Validation(format!("invalid site slug: {:?}", slug))),
    }
}

pub(super) fn placeholder_index(domain: &str, public_dir: &Path) -> String {
    format!(
        r#"<?php
$domain = '{domain}';
$docRoot = '{root}';
?>
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title><?php echo htmlspecialchars($domain, ENT_QUOTES, 'UTF-8'); ?> - FastCP</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center; color: #1f2937; }}
        main {{ max-width: 640px; padding: 40px 32px; border: 1px solid #e5e7eb; border-radius: 16px; text-align: center; }}
        h1 {{ font-size: 30px; margin: 0 0 10px; color: #0f172a; }}
        .domain {{ color: #004aad; margin: 0 0 20px; }}
        code {{ font-size: 12px; word-break: break-all; }}
    </style>
</head>
<body>
    <main>
        <h1>Your website is ready</h1>
        <p class="domain"><?php echo htmlspecialchars($domain, ENT_QUOTES, 'UTF-8'); ?></p>
        <p>Upload your website files to:<br><code><?php echo htmlspecialchars($docRoot, ENT_QUOTES, 'UTF-8'); ?></code></p>
        <p>Built with <a href="https://github.com/rehmatworks/fastcp">FastCP</a></p>
    </main>
</body>
</html>
"#,
        domain = php_single_quoted(domain),
        root = php_single_quoted(&public_dir.display().to_string()),
    )
}

fn php_single_quoted(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Restrict the tree to its owner; group and others get nothing.
pub(super) async fn set_acls(path: &Path, username: &str) -> Result<()> {
    let target = path.display().to_string();
    let user_rule = format!("u:{}:rwx", username);
    Cmd::new("setfacl")
        .args(["-R", "-m", user_rule.as_str(), target.as_str()])
        .run()
        .await?;
    Cmd::new("setfacl")
        .args(["-R", "-d", "-m", user_rule.as_str(), target.as_str()])
        .run()
        .await?;
    Cmd::new("setfacl")
        .args(["-R", "-m", "o::---", target.as_str()])
        .run()
        .await?;
    Ok(())
}

pub async fn create_directory(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: CreateSiteDirectory = params(&raw)?;
    validate_username(&req.username)?;
    info!("Creating site directory for {} ({})", req.domain, req.username);

    let acct = require_account(&req.username)?;
    let dir = site_dir(&ctx.layout, &req.username, &req.slug)?;
    let public = dir.join("public");
    for sub in [&dir, &public, &dir.join("logs"), &dir.join("tmp")] {
        ensure_dir(sub, 0o755)?;
    }

    let index = public.join("index.php");
    if !index.exists() {
        write_atomic(&index, placeholder_index(&req.domain, &public).as_bytes(), 0o644)?;
    }
    chown_recursive(&dir, acct.uid, acct.gid)
        .map_err(|e| e.context("failed to set ownership"))?;
    if let Err(e) = set_acls(&dir, &req.username).await {
        warn!("Failed to set ACLs on {}: {}", dir.display(), e);
    }

    bootstrap_tenant(&ctx.layout, &req.username)?;
    ctx.reconcile().await?;

    Ok(json!({ "status": "ok", "path": dir }))
}

pub async fn delete_directory(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: DeleteSiteDirectory = params(&raw)?;
    validate_username(&req.username)?;
    info!("Deleting site directory {} of {}", req.slug, req.username);

    let dir = site_dir(&ctx.layout, &req.username, &req.slug)?;
    if !dir.starts_with(ctx.layout.tenant_apps_dir(&req.username)) {
        return Err(AgentError::Validation("invalid path".into()));
    }
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(AgentError::io("delete directory", &dir, e)),
    }

    ctx.reconcile().await?;
    Ok(ok())
}

pub async fn install_wordpress(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let mut req: InstallWordPress = params(&raw)?;
    validate_username(&req.username)?;
    validate_identifier("database name", &req.db_name)?;
    validate_identifier("database user", &req.db_user)?;
    info!("Installing WordPress for {} ({})", req.domain, req.username);

    let acct = require_account(&req.username)?;
    let public = PathBuf::from(&req.path);
    if !public.is_absolute()
        || public.components().any(|c| c == Component::ParentDir)
        || !public.starts_with(ctx.layout.tenant_home(&req.username))
    {
        return Err(AgentError::Validation(format!(
            "install path {} is outside the home of {}",
            req.path, req.username
        )));
    }
    if req.db_pass.is_empty() {
        req.db_pass = random_string(24, PASSWORD_CHARSET)?;
    }

    let archive = tempfile::Builder::new()
        .prefix(&format!("wp-{}-", req.username))
        .suffix(".tar.gz")
        .tempfile()
        .map_err(|e| AgentError::io("create temp file in", std::env::temp_dir(), e))?;
    let archive_path = archive.path().display().to_string();
    Cmd::new("curl")
        .args(["-fsSL", "-o", archive_path.as_str(), WORDPRESS_URL])
        .run()
        .await
        .map_err(|e| e.context("failed to download WordPress"))?;

    ensure_dir(&public, 0o755)?;
    let public_arg = public.display().to_string();
    Cmd::new("tar")
        .args([
            "-xzf",
            archive_path.as_str(),
            "-C",
            public_arg.as_str(),
            "--strip-components=1",
        ])
        .run()
        .await
        .map_err(|e| e.context("failed to extract WordPress"))?;

    database::provision(&ctx, &req.db_name, &req.db_user, &req.db_pass).await?;

    let config = wp_config(&req.db_name, &req.db_user, &req.db_pass)?;
    write_atomic(&public.join("wp-config.php"), config.as_bytes(), 0o640)
        .map_err(|e| e.context("failed to write wp-config.php"))?;

    let site_root = public.parent().unwrap_or(&public);
    chown_recursive(site_root, acct.uid, acct.gid)
        .map_err(|e| e.context("failed to set ownership"))?;

    to_value(&WordPressInstalled {
        status: "ok".into(),
        db_name: req.db_name,
        db_user: req.db_user,
        db_pass: req.db_pass,
    })
}

pub(super) fn wp_config(db_name: &str, db_user: &str, db_pass: &str) -> Result<String> {
    let mut salts = Vec::with_capacity(8);
    for _ in 0..8 {
        salts.push(random_string(64, SALT_CHARSET)?);
    }
    let keys = [
        "AUTH_KEY",
        "SECURE_AUTH_KEY",
        "LOGGED_IN_KEY",
        "NONCE_KEY",
        "AUTH_SALT",
        "SECURE_AUTH_SALT",
        "LOGGED_IN_SALT",
        "NONCE_SALT",
    ];
    let salt_lines: String = keys
        .iter()
        .zip(&salts)
        .map(|(k, v)| format!("define( '{}', '{}' );\n", k, v))
        .collect();

    Ok(format!(
        r#"<?php
/**
 * WordPress Configuration - Generated by FastCP
 */

define( 'DB_NAME', '{name}' );
define( 'DB_USER', '{user}' );
define( 'DB_PASSWORD', '{pass}' );
define( 'DB_HOST', '127.0.0.1' );
define( 'DB_CHARSET', 'utf8mb4' );
define( 'DB_COLLATE', '' );

{salts}
$table_prefix = 'wp_';

// Behind the reverse proxy
if ( isset( $_SERVER['HTTP_X_FORWARDED_PROTO'] ) && $_SERVER['HTTP_X_FORWARDED_PROTO'] === 'https' ) {{
	$_SERVER['HTTPS'] = 'on';
}}
if ( isset( $_SERVER['HTTP_X_FORWARDED_SSL'] ) && $_SERVER['HTTP_X_FORWARDED_SSL'] === 'on' ) {{
	$_SERVER['HTTPS'] = 'on';
}}

define( 'FORCE_SSL_ADMIN', true );

if ( isset( $_SERVER['HTTPS'] ) && $_SERVER['HTTPS'] === 'on' ) {{
	define( 'WP_HOME', 'https://' . $_SERVER['HTTP_HOST'] );
	define( 'WP_SITEURL', 'https://' . $_SERVER['HTTP_HOST'] );
}}

define( 'WP_DEBUG', false );

if ( ! defined( 'ABSPATH' ) ) {{
	define( 'ABSPATH', __DIR__ . '/' );
}}

require_once ABSPATH . 'wp-settings.php';
"#,
        name = db_name,
        user = db_user,
        pass = php_single_quoted(db_pass),
        salts = salt_lines,
    ))
}
