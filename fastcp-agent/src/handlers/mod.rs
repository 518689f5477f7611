//! RPC method handlers, one module per namespace.
//!
//! Every handler that changes hosting topology finishes with a reconciliation
//! pass and fails when that pass fails.

mod caddy;
mod cron;
pub mod database;
mod firewall;
pub(crate) mod mysql;
pub(crate) mod php;
mod site;
mod ssh;
mod sshd;
mod system;
pub(crate) mod update;
mod user;

use std::sync::Arc;

use fastcp_protocol::protocol::parse_params;
use fastcp_unix::account::{self, Account};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Value, json};

use crate::context::AgentContext;
use crate::dispatch::{Dispatcher, Handler, HandlerFuture};
use crate::errors::{AgentError, Result};

/// Adapt `async fn(Arc<AgentContext>, Value) -> Result<Value>` to a table entry.
macro_rules! handler {
    ($f:path) => {
        (|ctx: Arc<AgentContext>, params: Value| -> HandlerFuture { Box::pin($f(ctx, params)) })
            as Handler
    };
}

pub fn register(d: &mut Dispatcher) {
    d.register("site.createDirectory", handler!(site::create_directory));
    d.register("site.deleteDirectory", handler!(site::delete_directory));
    d.register("site.installWordPress", handler!(site::install_wordpress));

    d.register("caddy.reload", handler!(caddy::reload));

    d.register("database.create", handler!(database::create));
    d.register("database.delete", handler!(database::delete));
    d.register("database.resetPassword", handler!(database::reset_password));

    d.register("ssh.addKey", handler!(ssh::add_key));
    d.register("ssh.removeKey", handler!(ssh::remove_key));

    d.register("system.status", handler!(system::status));
    d.register("system.services", handler!(system::services));
    d.register("system.update", handler!(update::perform));
    d.register("system.getMysqlConfig", handler!(mysql::get_config));
    d.register("system.setMysqlConfig", handler!(mysql::set_config));
    d.register("system.getSshConfig", handler!(sshd::get_config));
    d.register("system.setSshConfig", handler!(sshd::set_config));
    d.register("system.getPhpDefaultConfig", handler!(php::get_default));
    d.register("system.setPhpDefaultConfig", handler!(php::set_default));
    d.register("system.installPhpVersion", handler!(php::install_version));
    d.register("system.getCaddyConfig", handler!(caddy::get_config));
    d.register("system.setCaddyConfig", handler!(caddy::set_config));
    d.register("system.getFirewallStatus", handler!(firewall::status));
    d.register("system.installFirewall", handler!(firewall::install));
    d.register("system.setFirewallEnabled", handler!(firewall::set_enabled));
    d.register("system.firewallAllowPort", handler!(firewall::allow_port));
    d.register("system.firewallDenyPort", handler!(firewall::deny_port));
    d.register("system.firewallDeleteRule", handler!(firewall::delete_rule));
    d.register("system.getRcloneStatus", handler!(system::rclone_status));
    d.register("system.installRclone", handler!(system::install_rclone));

    d.register("user.create", handler!(user::create));
    d.register("user.delete", handler!(user::delete));
    d.register("user.updateLimits", handler!(user::update_limits));

    d.register("cron.sync", handler!(cron::sync));
}

/// Decode raw params into a typed payload.
fn params<T: DeserializeOwned>(raw: &Value) -> Result<T> {
    parse_params(raw).map_err(|e| AgentError::InvalidParams(e.to_string()))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| AgentError::Internal(format!("failed to encode result: {}", e)))
}

fn ok() -> Value {
    json!({ "status": "ok" })
}

/// The OS account backing a tenant.
fn require_account(username: &str) -> Result<Account> {
    account::lookup(username).ok_or_else(|| AgentError::UserNotFound(username.to_string()))
}

/// Tenant names become paths and command arguments.
fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && username.len() <= 32
        && username
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
        && !username.starts_with(['-', '.']);
    if valid {
        Ok(())
    } else {
        Err(AgentError::Validation(format!("invalid username: {:?}", username)))
    }
}

/// `len` random characters from `charset`.
fn random_string(len: usize, charset: &[u8]) -> Result<String> {
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| AgentError::Internal(format!("random source unavailable: {}", e)))?;
    Ok(bytes
        .iter()
        .map(|b| charset[*b as usize % charset.len()] as char)
        .collect())
}
