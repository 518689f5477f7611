//! Typed parameter and result payloads for the agent methods.
//!
//! Field names are the wire names. Every struct tolerates missing fields so
//! older callers keep working when a field is added.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSiteDirectory {
    pub username: String,
    pub domain: String,
    /// Directory name of the site under `~/apps`
    pub slug: String,
    pub site_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteSiteDirectory {
    pub username: String,
    pub slug: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallWordPress {
    pub username: String,
    pub domain: String,
    pub path: String,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordPressInstalled {
    pub status: String,
    pub db_name: String,
    pub db_user: String,
    pub db_pass: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateDatabase {
    pub db_name: String,
    pub db_user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteDatabase {
    pub db_name: String,
    pub db_user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetDatabasePassword {
    pub db_name: String,
    pub db_user: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddSshKey {
    pub username: String,
    pub key_id: String,
    pub name: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoveSshKey {
    pub username: String,
    pub key_id: String,
    pub public_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStatus {
    pub hostname: String,
    pub os: String,
    pub uptime: i64,
    pub load_average: f64,
    pub memory_total: u64,
    pub memory_used: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub php_version: String,
    pub mysql_version: String,
    pub caddy_version: String,
    pub php_available_versions: Vec<String>,
    pub kernel_version: String,
    pub architecture: String,
    pub total_users: i64,
    pub total_websites: i64,
    pub total_databases: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub buffer_pool_mb: i64,
    pub max_connections: i64,
    pub perf_schema: bool,
    pub detected_ram_mb: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub port: i64,
    pub password_auth: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpDefaultConfig {
    pub default_php_version: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub available_php_versions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallPhpVersion {
    pub version: String,
}

/// Reverse-proxy performance and logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaddyConfig {
    /// `low_ram`, `balanced` or `high_throughput`
    pub profile: String,
    pub access_logs: bool,
    pub expert_mode: bool,
    pub read_header: String,
    pub read_body: String,
    pub write_timeout: String,
    pub idle_timeout: String,
    pub grace_period: String,
    pub max_header_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRule {
    /// e.g. `22/tcp`
    pub rule: String,
    pub action: String,
    pub from: String,
    pub ip_version: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallStatus {
    pub installed: bool,
    pub enabled: bool,
    pub control_panel_port: i64,
    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirewallRuleRequest {
    pub port: i64,
    /// `tcp` or `udp`
    pub protocol: String,
    /// `both`, `ipv4` or `ipv6`
    pub ip_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetFirewallEnabled {
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RcloneStatus {
    pub installed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    /// 0 means unlimited
    pub memory_mb: i64,
    /// 100 is one core, 0 means unlimited
    pub cpu_percent: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteUser {
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateUserLimits {
    pub username: String,
    pub memory_mb: i64,
    pub cpu_percent: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformUpdate {
    pub target_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCronJobs {
    pub username: String,
    pub jobs: Vec<CronJob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub expression: String,
    pub command: String,
    pub enabled: bool,
}

/// Summary of one reconciliation pass, returned by `caddy.reload`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSummary {
    pub sites: usize,
    pub pools_written: usize,
    pub pools_removed: usize,
    pub php_versions: Vec<String>,
    /// `started` or `reloaded`
    pub proxy_action: String,
    pub warnings: Vec<String>,
}
