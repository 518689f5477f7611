//! `ssh.*`: tenant `authorized_keys` entries tagged with a `fastcp:` marker.

use std::path::Path;
use std::sync::Arc;

use fastcp_protocol::payload::{AddSshKey, RemoveSshKey};
use serde_json::Value;
use tracing::info;

use super::{ok, params, require_account, validate_username};
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::files::{chown, ensure_dir, write_atomic};

fn marker(key_id: &str) -> String {
    format!("fastcp:{}:", key_id)
}

/// `authorized_keys` line for a managed key.
pub(super) fn key_line(public_key: &str, key_id: &str, name: &str) -> Result<String> {
    let key = public_key.trim();
    if key.is_empty() || key.contains(['\n', '\r']) {
        return Err(AgentError::Validation("public key must be a single line".into()));
    }
    if key_id.is_empty() || key_id.contains(char::is_whitespace) || key_id.contains(':') {
        return Err(AgentError::Validation(format!("invalid key id: {:?}", key_id)));
    }
    let name = name.replace(['\n', '\r'], " ");
    Ok(format!("{} # {}{}", key, marker(key_id), name.trim()))
}

/// `content` without the lines managed under `key_id`, or without `public_key`
/// when given and no marker matches. Returns the new text and whether anything
/// was removed.
pub(super) fn without_key(content: &str, key_id: &str, public_key: &str) -> (String, bool) {
    let tag = marker(key_id);
    let by_marker = content.lines().any(|l| l.contains(&tag));
    let wanted = public_key.trim();

    let kept: Vec<&str> = content
        .lines()
        .filter(|line| {
            if by_marker {
                !line.contains(&tag)
            } else {
                wanted.is_empty() || line.split(" # ").next().map(str::trim) != Some(wanted)
            }
        })
        .collect();
    let removed = kept.len() != content.lines().count();

    let mut text = kept.join("\n");
    if !kept.is_empty() {
        text.push('\n');
    }
    (text, removed)
}

fn read_keys(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(AgentError::io("read", path, e)),
    }
}

pub async fn add_key(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: AddSshKey = params(&raw)?;
    validate_username(&req.username)?;
    info!("Adding SSH key {} for {}", req.key_id, req.username);

    let acct = require_account(&req.username)?;
    let line = key_line(&req.public_key, &req.key_id, &req.name)?;

    let ssh_dir = acct.home.join(".ssh");
    ensure_dir(&ssh_dir, 0o700)?;
    chown(&ssh_dir, acct.uid, acct.gid)?;

    let path = ssh_dir.join("authorized_keys");
    let (mut content, _) = without_key(&read_keys(&path)?, &req.key_id, "");
    content.push_str(&line);
    content.push('\n');
    write_atomic(&path, content.as_bytes(), 0o600)?;
    chown(&path, acct.uid, acct.gid)?;
    Ok(ok())
}

pub async fn remove_key(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: RemoveSshKey = params(&raw)?;
    validate_username(&req.username)?;
    info!("Removing SSH key {} for {}", req.key_id, req.username);

    let acct = require_account(&req.username)?;
    let path = acct.home.join(".ssh").join("authorized_keys");
    let current = read_keys(&path)?;
    let (content, removed) = without_key(&current, &req.key_id, &req.public_key);
    if removed {
        write_atomic(&path, content.as_bytes(), 0o600)?;
        chown(&path, acct.uid, acct.gid)?;
    }
    Ok(ok())
}
