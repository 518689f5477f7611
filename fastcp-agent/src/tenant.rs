//! Per-tenant host environment.

use std::path::Path;

use fastcp_unix::account::{self, Account};
use tracing::debug;

use crate::errors::Result;
use crate::files::{chown, ensure_dir, touch};
use crate::layout::Layout;

/// Private scratch directories under `~/.tmp`.
const TMP_SUBDIRS: [&str; 5] = ["sessions", "uploads", "cache", "phpmyadmin", "wsdl"];

fn make_owned(path: &Path, mode: u32, owner: Option<&Account>) -> Result<()> {
    ensure_dir(path, mode)?;
    if let Some(acct) = owner {
        chown(path, acct.uid, acct.gid)?;
    }
    Ok(())
}

/// Create the directories and log file a tenant's pools rely on.
///
/// Idempotent. Ownership is only changed when the OS account exists, so a
/// half-created tenant still gets its layout.
pub fn bootstrap_tenant(layout: &Layout, username: &str) -> Result<()> {
    let owner = account::lookup(username);
    if owner.is_none() {
        debug!("No account for tenant {}; creating directories without chown", username);
    }
    let owner = owner.as_ref();

    make_owned(&layout.tenant_apps_dir(username), 0o755, owner)?;
    make_owned(&layout.tenant_fastcp_dir(username), 0o755, owner)?;
    make_owned(&layout.tenant_run_dir(username), 0o755, owner)?;

    let tmp = layout.tenant_tmp_dir(username);
    make_owned(&tmp, 0o700, owner)?;
    for sub in TMP_SUBDIRS {
        make_owned(&tmp.join(sub), 0o700, owner)?;
    }

    ensure_dir(&layout.tenant_config_dir(username), 0o755)?;

    ensure_dir(&layout.log_dir, 0o755)?;
    let log = layout.tenant_error_log(username);
    touch(&log, 0o644)?;
    if let Some(acct) = owner {
        chown(&log, acct.uid, acct.gid)?;
    }
    Ok(())
}

/// Touch `path` and hand it to `username` when that account exists.
pub fn ensure_owned_file(path: &Path, username: &str) -> Result<()> {
    touch(path, 0o644)?;
    if let Some(acct) = account::lookup(username) {
        chown(path, acct.uid, acct.gid)?;
    }
    Ok(())
}

/// Tenants known to the agent: one directory per tenant under the users config dir.
pub fn known_tenants(layout: &Layout) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(layout.users_config_dir()) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests;
