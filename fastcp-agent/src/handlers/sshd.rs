//! OpenSSH server settings via a managed drop-in.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fastcp_protocol::payload::SshConfig;
use serde_json::Value;
use tracing::{info, warn};

use super::{ok, params, to_value};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::files::{ensure_dir, list_matching, remove_file_if_exists, write_atomic};
use crate::layout::Layout;

const SSHD_CANDIDATES: [&str; 3] = ["/usr/sbin/sshd", "/sbin/sshd", "/usr/local/sbin/sshd"];
const SSH_RUNTIME_DIR: &str = "/run/sshd";
const DISABLED_PREFIX: &str = "# FastCP disabled conflicting Port directive: ";

pub(super) fn render_dropin(port: i64, password_auth: bool) -> String {
    let auth = if password_auth { "yes" } else { "no" };
    format!(
        "# Managed by FastCP\n\
         # Use the control panel to modify these values.\n\
         Port {port}\n\
         PasswordAuthentication {auth}\n\
         KbdInteractiveAuthentication {auth}\n"
    )
}

/// Settings seen in sshd configuration text, layered over `cfg`.
///
/// Password login counts as enabled when either password or
/// keyboard-interactive authentication is on.
pub(super) fn apply_directives(text: &str, cfg: &mut SshConfig) {
    let mut password = None;
    let mut kbd = None;
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or_default();
        let mut fields = line.split_whitespace();
        let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "port" => {
                if let Ok(port) = value.parse::<i64>()
                    && (1..=65535).contains(&port)
                {
                    cfg.port = port;
                }
            }
            "passwordauthentication" => password = Some(value.eq_ignore_ascii_case("yes")),
            "kbdinteractiveauthentication" | "challengeresponseauthentication" => {
                kbd = Some(value.eq_ignore_ascii_case("yes"))
            }
            _ => {}
        }
    }
    if password.is_some() || kbd.is_some() {
        let current = cfg.password_auth;
        cfg.password_auth = password.unwrap_or(current) || kbd.unwrap_or(current);
    }
}

/// Whether the main config already includes the drop-in directory.
pub(super) fn has_dropin_include(text: &str, dropin_dir: &Path) -> bool {
    let dir = format!("{}/", dropin_dir.display());
    text.lines().any(|line| {
        let line = line.trim();
        if line.starts_with('#') {
            return false;
        }
        let mut fields = line.split_whitespace();
        matches!(
            (fields.next(), fields.next()),
            (Some(key), Some(target)) if key.eq_ignore_ascii_case("Include") && target.contains(&dir)
        )
    })
}

/// Comment out `Port` lines naming anything other than `target`.
/// Returns `None` when nothing changed.
pub(super) fn disable_conflicting_ports(text: &str, target: i64) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                return line.to_string();
            }
            let mut fields = trimmed.split_whitespace();
            if let (Some(key), Some(value)) = (fields.next(), fields.next())
                && key.eq_ignore_ascii_case("Port")
                && let Ok(port) = value.parse::<i64>()
                && (1..=65535).contains(&port)
                && port != target
            {
                changed = true;
                return format!("{}{}", DISABLED_PREFIX, trimmed);
            }
            line.to_string()
        })
        .collect();
    changed.then(|| lines.join("\n"))
}

fn sshd_binary() -> Result<PathBuf> {
    which::which("sshd").ok()
        .or_else(|| SSHD_CANDIDATES.iter().map(PathBuf::from).find(|p| p.exists()))
        .ok_or_else(|| AgentError::Operation("sshd binary not found".into()))
}

fn dropin_files(layout: &Layout) -> Vec<PathBuf> {
    let own = layout.sshd_fastcp_config();
    list_matching(&layout.sshd_dropin_dir(), |name| name.ends_with(".conf"))
        .into_iter()
        .filter(|p| *p != own)
        .collect()
}

async fn effective_config(layout: &Layout) -> Result<SshConfig> {
    let sshd = sshd_binary()?;
    ensure_dir(Path::new(SSH_RUNTIME_DIR), 0o755)?;
    let main = layout.sshd_main_config();
    let out = Cmd::new(sshd.display().to_string())
        .args(["-T", "-f"])
        .arg(main.display().to_string())
        .run()
        .await
        .map_err(|e| e.context("failed to read effective ssh config"))?;
    let mut cfg = SshConfig { port: 22, password_auth: true };
    apply_directives(&out, &mut cfg);
    Ok(cfg)
}

fn parsed_config(layout: &Layout) -> SshConfig {
    let mut cfg = SshConfig { port: 22, password_auth: true };
    let mut files = vec![layout.sshd_main_config()];
    files.extend(dropin_files(layout));
    files.push(layout.sshd_fastcp_config());
    for path in files {
        if let Ok(text) = std::fs::read_to_string(&path) {
            apply_directives(&text, &mut cfg);
        }
    }
    cfg
}

pub async fn get_config(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let cfg = match effective_config(&ctx.layout).await {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Failed to read effective ssh config, parsing files instead: {}", e);
            parsed_config(&ctx.layout)
        }
    };
    to_value(&cfg)
}

/// Original contents of every file touched while applying new settings.
/// `None` means the file did not exist.
#[derive(Default)]
struct Backups {
    files: Vec<(PathBuf, Option<Vec<u8>>)>,
}

impl Backups {
    fn write(&mut self, path: &Path, contents: &[u8]) -> Result<()> {
        if !self.files.iter().any(|(p, _)| p == path) {
            self.files.push((path.to_path_buf(), std::fs::read(path).ok()));
        }
        write_atomic(path, contents, 0o644)
    }

    fn restore(self) {
        for (path, original) in self.files.into_iter().rev() {
            let res = match original {
                Some(bytes) => write_atomic(&path, &bytes, 0o644),
                None => remove_file_if_exists(&path).map(|_| ()),
            };
            if let Err(e) = res {
                warn!("Failed to restore {}: {}", path.display(), e);
            }
        }
    }
}

async fn restart_ssh(ctx: &AgentContext) -> Result<()> {
    let controller = ctx.controller.as_ref();
    let mut last = None;
    if controller.has_service_manager().await {
        for unit in ["ssh", "sshd"] {
            match controller.reload_or_restart_unit(unit).await {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
    }
    for name in ["ssh", "sshd"] {
        match Cmd::new("service").args([name, "restart"]).run().await {
            Ok(_) => return Ok(()),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or_else(|| AgentError::Operation("failed to restart SSH service".into())))
}

async fn apply(ctx: &AgentContext, cfg: &SshConfig, backups: &mut Backups) -> Result<()> {
    let layout = &ctx.layout;
    let main = layout.sshd_main_config();
    let dropin_dir = layout.sshd_dropin_dir();

    ensure_dir(&dropin_dir, 0o755)?;
    let main_text = std::fs::read_to_string(&main).map_err(|e| AgentError::io("read", &main, e))?;
    if !has_dropin_include(&main_text, &dropin_dir) {
        let text = format!("Include {}/*.conf\n{}", dropin_dir.display(), main_text);
        backups.write(&main, text.as_bytes())?;
    }

    backups
        .write(&layout.sshd_fastcp_config(), render_dropin(cfg.port, cfg.password_auth).as_bytes())
        .map_err(|e| e.context("failed to write ssh config"))?;

    let mut candidates = vec![main.clone()];
    candidates.extend(dropin_files(layout));
    for path in candidates {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Some(updated) = disable_conflicting_ports(&text, cfg.port) {
            backups.write(&path, updated.as_bytes()).map_err(|e| {
                e.context(format!("failed to normalize ssh port directives in {}", path.display()))
            })?;
        }
    }

    let sshd = sshd_binary().map_err(|e| e.context("ssh config validation failed"))?;
    ensure_dir(Path::new(SSH_RUNTIME_DIR), 0o755)
        .map_err(|e| e.context("ssh config validation failed"))?;
    Cmd::new(sshd.display().to_string())
        .args(["-t", "-f"])
        .arg(main.display().to_string())
        .run()
        .await
        .map_err(|e| e.context("ssh config validation failed"))?;

    restart_ssh(ctx)
        .await
        .map_err(|e| e.context("failed to apply SSH settings"))
}

pub async fn set_config(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let cfg: SshConfig = params(&raw)?;
    if !(1..=65535).contains(&cfg.port) {
        return Err(AgentError::Validation("port must be between 1 and 65535".into()));
    }

    let mut backups = Backups::default();
    if let Err(e) = apply(&ctx, &cfg, &mut backups).await {
        backups.restore();
        return Err(e);
    }

    info!("Updated SSH config: port={} password_auth={}", cfg.port, cfg.password_auth);
    Ok(ok())
}
