//! PHP runtime discovery.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;

use crate::cmd::Cmd;
use crate::errors::{AgentError, Result};
use crate::layout::Layout;
use crate::settings;

/// Version used when nothing else can be determined; also hosts the admin-tool pool.
pub const PREFERRED_VERSION: &str = "8.4";

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("valid regex"));
static EMBEDDED_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+\.\d+)\b").expect("valid regex"));
static UNIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^php(\d+\.\d+)-fpm\.service$").expect("valid regex"));

/// `"8.3"` stays `"8.3"`; anything not shaped `<major>.<minor>` is rejected.
pub fn normalize_version(version: &str) -> Option<String> {
    let v = version.trim();
    VERSION_RE.is_match(v).then(|| v.to_string())
}

/// First `<major>.<minor>` inside free text such as `php -v` output or `"PHP 8.4"`.
pub fn extract_version(text: &str) -> Option<String> {
    EMBEDDED_VERSION_RE
        .captures(text)
        .map(|c| c[1].to_string())
}

fn version_key(version: &str) -> (u32, u32) {
    let (major, minor) = version.split_once('.').unwrap_or((version, "0"));
    (major.parse().unwrap_or(0), minor.parse().unwrap_or(0))
}

/// Numeric ordering, so `8.10` sorts after `8.9`.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by_key(|v| version_key(v));
}

pub fn binary_candidates(version: &str) -> Vec<String> {
    vec![
        format!("php-fpm{}", version),
        format!("php{}-fpm", version),
        format!("/usr/sbin/php-fpm{}", version),
        format!("/usr/sbin/php{}-fpm", version),
        format!("/usr/local/sbin/php-fpm{}", version),
        format!("/usr/local/sbin/php{}-fpm", version),
    ]
}

/// Path of the FPM binary for `version`, if installed.
pub fn find_fpm_binary(version: &str) -> Option<PathBuf> {
    binary_candidates(version).iter().find_map(|c| which::which(c).ok())
}

/// Installed `php<ver>-fpm` units by version.
pub fn installed_fpm_units(layout: &Layout) -> BTreeMap<String, String> {
    let mut units = BTreeMap::new();
    for dir in &layout.unit_dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(caps) = UNIT_RE.captures(name) {
                units.insert(
                    caps[1].to_string(),
                    name.trim_end_matches(".service").to_string(),
                );
            }
        }
    }
    units
}

/// Service unit managing the FPM master of `version`.
pub fn resolve_fpm_unit(layout: &Layout, version: &str) -> Result<String> {
    let normalized = normalize_version(version)
        .ok_or_else(|| AgentError::Validation(format!("invalid php version {:?}", version)))?;
    installed_fpm_units(layout)
        .remove(&normalized)
        .ok_or_else(|| {
            AgentError::Operation(format!("php-fpm service not found for version {}", normalized))
        })
}

/// Versions that have an FPM configuration and either a binary or a unit, sorted.
pub fn available_versions(layout: &Layout) -> Vec<String> {
    let units = installed_fpm_units(layout);
    let Ok(entries) = std::fs::read_dir(&layout.php_root) else {
        return Vec::new();
    };

    let mut versions: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().join("fpm").join("php-fpm.conf").is_file())
        .filter_map(|e| normalize_version(e.file_name().to_str()?))
        .filter(|v| units.contains_key(v) || find_fpm_binary(v).is_some())
        .collect();
    sort_versions(&mut versions);
    versions.dedup();
    versions
}

/// Version reported by the `php` CLI, or [`PREFERRED_VERSION`].
pub async fn system_cli_version() -> String {
    match Cmd::new("php").arg("-v").stdout().await {
        Some(out) => extract_version(&out).unwrap_or_else(|| PREFERRED_VERSION.to_string()),
        None => PREFERRED_VERSION.to_string(),
    }
}

/// Default version for new sites.
///
/// The persisted choice wins when it is installed (older free-form values such
/// as `"PHP 8.4"` are tolerated), then the preferred version, then the lowest
/// installed one, then whatever the `php` CLI reports.
pub async fn resolve_default_version(layout: &Layout, available: &[String]) -> String {
    if let Some(stored) = settings::load_php_default(layout) {
        let requested = normalize_version(&stored).or_else(|| extract_version(&stored));
        if let Some(v) = requested
            && available.contains(&v)
        {
            return v;
        }
    }
    if available.iter().any(|v| v == PREFERRED_VERSION) {
        return PREFERRED_VERSION.to_string();
    }
    if let Some(first) = available.first() {
        return first.clone();
    }
    system_cli_version().await
}
