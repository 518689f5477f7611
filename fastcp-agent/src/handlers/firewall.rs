//! Host firewall management through `ufw`.

use std::sync::Arc;

use fastcp_protocol::payload::{FirewallRule, FirewallRuleRequest, FirewallStatus, SetFirewallEnabled};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::php::apt;
use super::{ok, params, to_value};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};

/// The control panel itself; never blocked or removed.
pub(super) const CONTROL_PANEL_PORT: i64 = 2050;
const BASELINE_PORTS: [i64; 3] = [80, 443, CONTROL_PANEL_PORT];

fn ufw() -> Cmd {
    Cmd::new("ufw")
}

fn require_ufw() -> Result<()> {
    which::which("ufw")
        .map(|_| ())
        .map_err(|_| AgentError::Operation("ufw is not installed".into()))
}

pub(super) fn normalize_protocol(protocol: &str) -> &'static str {
    if protocol.trim().eq_ignore_ascii_case("udp") { "udp" } else { "tcp" }
}

pub(super) fn normalize_ip_version(ip_version: &str) -> &'static str {
    match ip_version.trim().to_ascii_lowercase().as_str() {
        "ipv4" => "ipv4",
        "ipv6" => "ipv6",
        _ => "both",
    }
}

pub(super) fn rule_ip_version(rule: &str) -> &'static str {
    if rule.to_ascii_lowercase().contains("(v6)") { "ipv6" } else { "ipv4" }
}

/// Split `To Action From` columns; `None` when there is no ALLOW/DENY column.
fn split_rule(text: &str) -> Option<(String, String, String)> {
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.len() < 3 {
        return None;
    }
    let idx = parts
        .iter()
        .position(|p| p.eq_ignore_ascii_case("ALLOW") || p.eq_ignore_ascii_case("DENY"))?;
    if idx == 0 {
        return None;
    }
    Some((
        parts[..idx].join(" "),
        parts[idx].to_ascii_uppercase(),
        parts[idx + 1..].join(" "),
    ))
}

/// Whether `ufw status` reports the firewall active, and its rule table.
pub(super) fn parse_status(output: &str) -> (bool, Vec<FirewallRule>) {
    let mut lines = output.lines();
    let enabled = lines
        .next()
        .is_some_and(|l| l.trim().to_ascii_lowercase().starts_with("status: active"));
    let rules = lines
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("To") && !l.starts_with("--"))
        .filter_map(split_rule)
        .map(|(rule, action, from)| FirewallRule {
            ip_version: rule_ip_version(&rule).to_string(),
            rule,
            action,
            from,
            description: String::new(),
        })
        .collect();
    (enabled, rules)
}

/// `[ 3] 8080/tcp ALLOW IN Anywhere` into number, rule and action.
pub(super) fn parse_numbered_line(line: &str) -> Option<(u32, String, String)> {
    let rest = line.trim().strip_prefix('[')?;
    let (num, rest) = rest.split_once(']')?;
    let num = num.trim().parse().ok()?;
    let (rule, action, _) = split_rule(rest)?;
    Some((num, rule, action))
}

/// Rule numbers in `ufw status numbered` output matching the port spec.
pub(super) fn matching_rule_numbers(
    output: &str,
    port: i64,
    protocol: &str,
    action: &str,
    ip_version: &str,
) -> Vec<u32> {
    let spec = format!("{}/{}", port, protocol).to_ascii_lowercase();
    output
        .lines()
        .filter_map(parse_numbered_line)
        .filter(|(_, rule, rule_action)| {
            rule.to_ascii_lowercase().starts_with(&spec)
                && (action.is_empty() || action.eq_ignore_ascii_case(rule_action))
                && (ip_version == "both" || ip_version == rule_ip_version(rule))
        })
        .map(|(num, _, _)| num)
        .collect()
}

async fn numbered_rules(port: i64, protocol: &str, action: &str, ip_version: &str) -> Result<Vec<u32>> {
    let out = ufw()
        .args(["status", "numbered"])
        .run()
        .await
        .map_err(|e| e.context("failed to inspect ufw numbered rules"))?;
    Ok(matching_rule_numbers(&out, port, protocol, action, ip_version))
}

/// ufw renumbers after every delete, so go from the highest number down.
async fn delete_rules(mut numbers: Vec<u32>) -> Result<()> {
    numbers.sort_unstable_by(|a, b| b.cmp(a));
    numbers.dedup();
    let mut failed = Vec::new();
    for num in numbers {
        if let Err(e) = ufw().args(["--force", "delete"]).arg(num.to_string()).run().await {
            failed.push(format!("#{}: {}", num, e));
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(AgentError::Operation(format!(
            "failed to delete ufw rules: {}",
            failed.join("; ")
        )))
    }
}

async fn reload_if_active() -> Result<()> {
    let status = ufw()
        .arg("status")
        .run()
        .await
        .map_err(|e| e.context("failed to read ufw status before reload"))?;
    if status.trim().to_ascii_lowercase().starts_with("status: active") {
        ufw()
            .arg("reload")
            .run()
            .await
            .map_err(|e| e.context("failed to reload ufw"))?;
    }
    Ok(())
}

/// `ufw allow` that tolerates an already present rule.
async fn allow_tcp_port(port: i64) -> Result<()> {
    let out = ufw().args(["allow", &format!("{}/tcp", port)]).output().await?;
    let text = out.combined().to_ascii_lowercase();
    if out.success || text.contains("skipping") || text.contains("exists") {
        Ok(())
    } else {
        Err(AgentError::Operation(format!(
            "failed to allow port {}: {}",
            port,
            out.combined()
        )))
    }
}

async fn ensure_baseline_rules() -> Result<()> {
    ufw()
        .args(["default", "deny", "incoming"])
        .run()
        .await
        .map_err(|e| e.context("failed to set ufw default deny incoming"))?;
    ufw()
        .args(["default", "allow", "outgoing"])
        .run()
        .await
        .map_err(|e| e.context("failed to set ufw default allow outgoing"))?;
    for port in BASELINE_PORTS {
        allow_tcp_port(port).await?;
    }
    Ok(())
}

fn validate_port(port: i64) -> Result<()> {
    if (1..=65535).contains(&port) {
        Ok(())
    } else {
        Err(AgentError::Validation("port must be between 1 and 65535".into()))
    }
}

pub async fn status(_ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let mut status = FirewallStatus {
        installed: which::which("ufw").is_ok(),
        enabled: false,
        control_panel_port: CONTROL_PANEL_PORT,
        rules: Vec::new(),
    };
    if !status.installed {
        return to_value(&status);
    }

    let out = ufw().arg("status").output().await?;
    if !out.success {
        let text = out.combined();
        let lower = text.to_ascii_lowercase();
        // Containers often run ufw without iptables access.
        if lower.contains("permission denied") || lower.contains("problem running iptables") {
            warn!("ufw status unavailable: {}", text);
            return to_value(&status);
        }
        return Err(AgentError::Operation(format!("failed to read ufw status: {}", text)));
    }
    let (enabled, rules) = parse_status(&out.stdout);
    status.enabled = enabled;
    status.rules = rules;
    to_value(&status)
}

pub async fn install(_ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    if which::which("ufw").is_ok() {
        return Ok(json!({ "status": "ok", "message": "UFW already installed" }));
    }
    apt(&["update", "-qq"])
        .run()
        .await
        .map_err(|e| e.context("failed to install ufw"))?;
    apt(&["install", "-y", "-qq", "ufw"])
        .run()
        .await
        .map_err(|e| e.context("failed to install ufw"))?;
    ensure_baseline_rules().await?;
    info!("Installed ufw with baseline rules");
    Ok(json!({ "status": "ok", "message": "UFW installed" }))
}

pub async fn set_enabled(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: SetFirewallEnabled = params(&raw)?;
    require_ufw()?;
    if req.enabled {
        ensure_baseline_rules().await?;
        ufw()
            .args(["--force", "enable"])
            .run()
            .await
            .map_err(|e| e.context("failed to enable ufw"))?;
    } else {
        ufw()
            .arg("disable")
            .run()
            .await
            .map_err(|e| e.context("failed to disable ufw"))?;
    }
    info!("Firewall enabled={}", req.enabled);
    Ok(ok())
}

/// Add an allow or deny rule, then drop the opposite-family duplicate ufw
/// creates when the request names a single IP version.
async fn add_rule(req: &FirewallRuleRequest, action: &str) -> Result<()> {
    let protocol = normalize_protocol(&req.protocol);
    let ip_version = normalize_ip_version(&req.ip_version);
    let verb = action.to_ascii_lowercase();
    ufw()
        .args([verb.as_str(), &format!("{}/{}", req.port, protocol)])
        .run()
        .await
        .map_err(|e| e.context(format!("failed to {} port", verb)))?;

    let other = match ip_version {
        "ipv4" => Some("ipv6"),
        "ipv6" => Some("ipv4"),
        _ => None,
    };
    if let Some(other) = other {
        match numbered_rules(req.port, protocol, action, other).await {
            Ok(nums) => delete_rules(nums).await?,
            Err(e) => warn!("Could not list {} rules for cleanup: {}", other, e),
        }
    }
    reload_if_active().await
}

pub async fn allow_port(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: FirewallRuleRequest = params(&raw)?;
    require_ufw()?;
    validate_port(req.port)?;
    add_rule(&req, "ALLOW").await?;
    Ok(ok())
}

pub async fn deny_port(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: FirewallRuleRequest = params(&raw)?;
    require_ufw()?;
    validate_port(req.port)?;
    if req.port == CONTROL_PANEL_PORT {
        return Err(AgentError::Validation(format!(
            "cannot block control panel port {}",
            CONTROL_PANEL_PORT
        )));
    }
    add_rule(&req, "DENY").await?;
    Ok(ok())
}

pub async fn delete_rule(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: FirewallRuleRequest = params(&raw)?;
    require_ufw()?;
    validate_port(req.port)?;
    if req.port == CONTROL_PANEL_PORT {
        return Err(AgentError::Validation(format!(
            "cannot remove rule for control panel port {}",
            CONTROL_PANEL_PORT
        )));
    }
    let protocol = normalize_protocol(&req.protocol);
    let ip_version = normalize_ip_version(&req.ip_version);

    let nums = numbered_rules(req.port, protocol, "", ip_version).await?;
    delete_rules(nums).await?;

    let remaining = numbered_rules(req.port, protocol, "", ip_version)
        .await
        .unwrap_or_default();
    if !remaining.is_empty() {
        return Err(AgentError::Operation(
            "firewall rule still exists after delete; please retry".into(),
        ));
    }
    reload_if_active().await?;
    info!("Removed firewall rules for {}/{}", req.port, protocol);
    Ok(ok())
}
