//! Resource-aware sizing for PHP pools and the proxy's server timeouts.
//!
//! Everything here is pure: the same inputs always give the same outputs,
//! which keeps reconciliation idempotent. Host RAM is read once by the caller
//! ([`detect_ram_mb`]) and passed in.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use fastcp_protocol::payload::CaddyConfig;
use tracing::debug;

use crate::duration::parse_strict_duration;
use crate::errors::{AgentError, Result};

/// RAM assumed when `/proc/meminfo` cannot be read.
pub const DEFAULT_RAM_MB: u64 = 1024;

pub const MIN_POOL_CHILDREN: u32 = 1;
pub const MAX_POOL_CHILDREN: u32 = 64;

const MIN_HEADER_SIZE: i64 = 4096;
const MAX_HEADER_SIZE: i64 = 262_144;
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_TIMEOUT: Duration = Duration::from_secs(600);

/// Proxy performance preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerformanceProfile {
    /// Memory-constrained hosts
    #[default]
    LowRam,
    Balanced,
    /// Throughput-oriented hosts
    HighThroughput,
}

impl FromStr for PerformanceProfile {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low_ram" => Ok(PerformanceProfile::LowRam),
            "balanced" => Ok(PerformanceProfile::Balanced),
            "high_throughput" => Ok(PerformanceProfile::HighThroughput),
            _ => Err("profile must be one of: balanced, low_ram, high_throughput".to_string()),
        }
    }
}

impl fmt::Display for PerformanceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceProfile::LowRam => write!(f, "low_ram"),
            PerformanceProfile::Balanced => write!(f, "balanced"),
            PerformanceProfile::HighThroughput => write!(f, "high_throughput"),
        }
    }
}

/// Server-wide timeouts and limits of one profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeouts {
    pub read_header: &'static str,
    pub read_body: &'static str,
    pub write: &'static str,
    pub idle: &'static str,
    pub grace_period: &'static str,
    pub max_header_size: i64,
}

/// Timeouts of `profile` on a host with `ram_mb` of memory.
///
/// Only `balanced` depends on RAM: it shrinks on hosts with at most 2GB and
/// grows on hosts with 8GB or more.
pub fn profile_defaults(profile: PerformanceProfile, ram_mb: u64) -> ServerTimeouts {
    match profile {
        PerformanceProfile::LowRam => ServerTimeouts {
            read_header: "8s",
            read_body: "20s",
            write: "45s",
            idle: "45s",
            grace_period: "5s",
            max_header_size: 16384,
        },
        PerformanceProfile::HighThroughput => ServerTimeouts {
            read_header: "10s",
            read_body: "45s",
            write: "120s",
            idle: "240s",
            grace_period: "20s",
            max_header_size: 65536,
        },
        PerformanceProfile::Balanced if ram_mb <= 2048 => ServerTimeouts {
            read_header: "10s",
            read_body: "20s",
            write: "60s",
            idle: "45s",
            grace_period: "5s",
            max_header_size: 16384,
        },
        PerformanceProfile::Balanced if ram_mb >= 8192 => ServerTimeouts {
            read_header: "10s",
            read_body: "30s",
            write: "90s",
            idle: "180s",
            grace_period: "15s",
            max_header_size: 65536,
        },
        PerformanceProfile::Balanced => ServerTimeouts {
            read_header: "10s",
            read_body: "30s",
            write: "90s",
            idle: "90s",
            grace_period: "8s",
            max_header_size: 32768,
        },
    }
}

fn apply_defaults(cfg: &mut CaddyConfig, defaults: &ServerTimeouts) {
    cfg.read_header = defaults.read_header.to_string();
    cfg.read_body = defaults.read_body.to_string();
    cfg.write_timeout = defaults.write.to_string();
    cfg.idle_timeout = defaults.idle.to_string();
    cfg.grace_period = defaults.grace_period.to_string();
    cfg.max_header_size = defaults.max_header_size;
}

/// Settings used when nothing valid is persisted: `low_ram`, error-only logs.
pub fn default_caddy_config(ram_mb: u64) -> CaddyConfig {
    let profile = PerformanceProfile::default();
    let mut cfg = CaddyConfig {
        profile: profile.to_string(),
        access_logs: false,
        expert_mode: false,
        ..Default::default()
    };
    apply_defaults(&mut cfg, &profile_defaults(profile, ram_mb));
    cfg
}

fn validate_duration_setting(name: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AgentError::Validation(format!("{} is required", name)));
    }
    let d = parse_strict_duration(value)
        .map_err(|_| AgentError::Validation(format!("{} is invalid duration", name)))?;
    if d < MIN_TIMEOUT || d > MAX_TIMEOUT {
        return Err(AgentError::Validation(format!(
            "{} must be between 1s and 10m",
            name
        )));
    }
    Ok(value.to_string())
}

/// Normalize and validate operator-supplied proxy settings.
///
/// Outside expert mode every timeout comes from the profile. In expert mode
/// blank fields are filled from the profile and the rest must be durations
/// within [1s, 10m] with a header size within [4096, 262144].
pub fn normalize_caddy_config(input: &CaddyConfig, ram_mb: u64) -> Result<CaddyConfig> {
    let mut cfg = input.clone();
    cfg.profile = cfg.profile.trim().to_lowercase();
    if cfg.profile.is_empty() {
        cfg.profile = PerformanceProfile::default().to_string();
    }
    let profile: PerformanceProfile = cfg.profile.parse().map_err(AgentError::Validation)?;
    let defaults = profile_defaults(profile, ram_mb);

    if !cfg.expert_mode {
        apply_defaults(&mut cfg, &defaults);
        return Ok(cfg);
    }

    let fill = |value: &mut String, default: &str| {
        if value.is_empty() {
            *value = default.to_string();
        }
    };
    fill(&mut cfg.read_header, defaults.read_header);
    fill(&mut cfg.read_body, defaults.read_body);
    fill(&mut cfg.write_timeout, defaults.write);
    fill(&mut cfg.idle_timeout, defaults.idle);
    fill(&mut cfg.grace_period, defaults.grace_period);
    if cfg.max_header_size == 0 {
        cfg.max_header_size = defaults.max_header_size;
    }

    cfg.read_header = validate_duration_setting("read_header", &cfg.read_header)?;
    cfg.read_body = validate_duration_setting("read_body", &cfg.read_body)?;
    cfg.write_timeout = validate_duration_setting("write_timeout", &cfg.write_timeout)?;
    cfg.idle_timeout = validate_duration_setting("idle_timeout", &cfg.idle_timeout)?;
    cfg.grace_period = validate_duration_setting("grace_period", &cfg.grace_period)?;
    if !(MIN_HEADER_SIZE..=MAX_HEADER_SIZE).contains(&cfg.max_header_size) {
        return Err(AgentError::Validation(
            "max_header_size must be between 4096 and 262144 bytes".to_string(),
        ));
    }

    Ok(cfg)
}

/// Worker budget of one site pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_children: u32,
    pub idle_timeout: &'static str,
    pub max_requests: u32,
}

fn clamp(v: u64, min: u64, max: u64) -> u64 {
    v.clamp(min, max)
}

/// Size one site's pool.
///
/// `tenant_limit_mb <= 0` means the tenant has no memory ceiling. A ceiling is
/// split evenly across the tenant's `site_count` sites (integer division).
pub fn site_pool_tuning(ram_mb: u64, tenant_limit_mb: i64, site_count: usize) -> PoolTuning {
    let site_count = site_count.max(1) as u64;
    let max = MAX_POOL_CHILDREN as u64;

    let mut base = clamp(ram_mb / 768, 2, max);
    if tenant_limit_mb > 0 {
        let tenant_budget = clamp(tenant_limit_mb as u64 / 96, 1, max);
        let per_site = clamp(tenant_budget / site_count, 1, max);
        base = base.min(per_site);
    }

    let (children, idle_timeout, max_requests) = match ram_mb {
        0..=1024 => (base.min(2), "8s", 400),
        1025..=2048 => (base.min(3), "10s", 500),
        2049..=8192 => (base, "15s", 800),
        _ => (base, "25s", 1200),
    };

    PoolTuning {
        max_children: clamp(children, MIN_POOL_CHILDREN as u64, max) as u32,
        idle_timeout,
        max_requests,
    }
}

/// Worker count of the shared database-admin pool.
pub fn admin_pool_max_children(ram_mb: u64) -> u32 {
    match ram_mb {
        0..=1024 => 2,
        1025..=2048 => 4,
        2049..=4096 => 6,
        4097..=8192 => 10,
        _ => 14,
    }
}

/// Total memory in MB from the contents of `/proc/meminfo`.
pub fn parse_meminfo_mb(text: &str) -> Option<u64> {
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    (kb > 0).then_some(kb / 1024)
}

/// Host RAM in MB, [`DEFAULT_RAM_MB`] when it cannot be determined.
pub fn detect_ram_mb(meminfo: &Path) -> u64 {
    match std::fs::read_to_string(meminfo) {
        Ok(text) => parse_meminfo_mb(&text).unwrap_or(DEFAULT_RAM_MB),
        Err(e) => {
            debug!("Cannot read {}: {}", meminfo.display(), e);
            DEFAULT_RAM_MB
        }
    }
}
