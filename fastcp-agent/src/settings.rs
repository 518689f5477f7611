//! Operator settings persisted by the agent: the proxy profile and the
//! default PHP version. Both are small JSON files under the config dir.

use fastcp_protocol::payload::{CaddyConfig, PhpDefaultConfig};
use tracing::warn;

use crate::errors::{AgentError, Result};
use crate::files::{ensure_dir, write_atomic};
use crate::layout::Layout;
use crate::tuning::{default_caddy_config, normalize_caddy_config};

/// Active proxy settings. Missing, unreadable or invalid files fall back to
/// the defaults for this host.
pub fn load_caddy_settings(layout: &Layout, ram_mb: u64) -> CaddyConfig {
    let path = layout.caddy_settings();
    let data = match std::fs::read(&path) {
        Ok(d) => d,
        Err(_) => return default_caddy_config(ram_mb),
    };
    let cfg: CaddyConfig = match serde_json::from_slice(&data) {
        Ok(c) => c,
        Err(e) => {
            warn!("Invalid caddy settings file {}; using defaults: {}", path.display(), e);
            return default_caddy_config(ram_mb);
        }
    };
    match normalize_caddy_config(&cfg, ram_mb) {
        Ok(c) => c,
        Err(e) => {
            warn!("Invalid caddy settings values; using defaults: {}", e);
            default_caddy_config(ram_mb)
        }
    }
}

/// Persist already-normalized proxy settings.
pub fn save_caddy_settings(layout: &Layout, cfg: &CaddyConfig) -> Result<()> {
    let path = layout.caddy_settings();
    ensure_dir(&layout.config_dir(), 0o755)?;
    let data = serde_json::to_vec_pretty(cfg)
        .map_err(|e| AgentError::Internal(format!("failed to encode caddy settings: {}", e)))?;
    write_atomic(&path, &data, 0o644)
}

/// Raw persisted default PHP version, not validated against installed versions.
pub fn load_php_default(layout: &Layout) -> Option<String> {
    let data = std::fs::read(layout.php_defaults()).ok()?;
    let cfg: PhpDefaultConfig = serde_json::from_slice(&data).ok()?;
    Some(cfg.default_php_version)
}

pub fn save_php_default(layout: &Layout, version: &str) -> Result<()> {
    ensure_dir(&layout.config_dir(), 0o755)?;
    let cfg = PhpDefaultConfig {
        default_php_version: version.to_string(),
        available_php_versions: Vec::new(),
    };
    let data = serde_json::to_vec_pretty(&cfg)
        .map_err(|e| AgentError::Internal(format!("failed to encode php defaults: {}", e)))?;
    write_atomic(&layout.php_defaults(), &data, 0o644)
}

#[cfg(test)]
mod tests;
