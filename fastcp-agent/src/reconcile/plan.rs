//! Pool planning: desired state in, pool descriptors out. No I/O.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::warn;

use super::snapshot::DesiredState;
use crate::errors::{AgentError, Result};
use crate::layout::Layout;
use crate::model::{PhpLimits, Site};
use crate::php::normalize_version;
use crate::tuning::{PoolTuning, site_pool_tuning};

/// Length of the site id fragment used in pool and socket names.
pub const SOCKET_ID_LEN: usize = 12;

/// Prefix of every site pool file the engine owns.
pub const SITE_POOL_PREFIX: &str = "fastcp-site-";

/// Sites owned by these accounts never get a pool or a proxy block.
pub fn is_disallowed_owner(username: &str) -> bool {
    username.eq_ignore_ascii_case("root")
}

/// Site id without dashes, truncated to [`SOCKET_ID_LEN`].
pub fn socket_id(site_id: &str) -> String {
    site_id
        .chars()
        .filter(|c| *c != '-')
        .take(SOCKET_ID_LEN)
        .collect()
}

fn id_digest(site_id: &str) -> String {
    let digest = Sha256::digest(site_id.as_bytes());
    hex::encode(&digest[..4])
}

/// One site's FPM pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitePool {
    pub site_id: String,
    pub username: String,
    pub domain: String,
    pub version: String,
    /// `id12`, or `id12-<hash8>` when the tenant has two sites sharing `id12`
    pub key: String,
    pub pool_name: String,
    pub socket: PathBuf,
    pub conf_path: PathBuf,
    pub document_root: PathBuf,
    pub tmp_dir: PathBuf,
    pub error_log: PathBuf,
    pub tuning: PoolTuning,
    pub php: PhpLimits,
}

impl SitePool {
    pub fn open_basedir(&self) -> String {
        let parent = self
            .document_root
            .parent()
            .unwrap_or(Path::new("/"))
            .display()
            .to_string();
        [
            parent,
            self.document_root.display().to_string(),
            self.tmp_dir.display().to_string(),
            "/tmp".to_string(),
            "/usr/share/php".to_string(),
        ]
        .join(":")
    }

    /// True for socket file names this site used under an older naming or
    /// another PHP version: `php-<key>.sock` and `php-<key>-v<digits>.sock`.
    pub fn is_own_socket_name(&self, name: &str) -> bool {
        let Some(rest) = name
            .strip_prefix("php-")
            .and_then(|r| r.strip_prefix(self.key.as_str()))
        else {
            return false;
        };
        if rest == ".sock" {
            return true;
        }
        rest.strip_prefix("-v")
            .and_then(|r| r.strip_suffix(".sock"))
            .is_some_and(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolPlan {
    /// In site id order
    pub pools: Vec<SitePool>,
    /// Ids of sites skipped because of their owner
    pub skipped: Vec<String>,
}

impl PoolPlan {
    pub fn socket_for(&self, site_id: &str) -> Option<&Path> {
        self.pools
            .iter()
            .find(|p| p.site_id == site_id)
            .map(|p| p.socket.as_path())
    }

    pub fn sockets_by_version(&self) -> BTreeMap<String, Vec<PathBuf>> {
        let mut out: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for pool in &self.pools {
            out.entry(pool.version.clone())
                .or_default()
                .push(pool.socket.clone());
        }
        out
    }

    pub fn conf_paths(&self) -> BTreeSet<PathBuf> {
        self.pools.iter().map(|p| p.conf_path.clone()).collect()
    }
}

/// Compute every site pool for `state`.
///
/// Fails, before anything is written, on an invalid PHP version, on a domain
/// claimed by two sites, and on two sites of one tenant sharing an id.
pub fn plan_pools(state: &DesiredState, layout: &Layout) -> Result<PoolPlan> {
    let mut plan = PoolPlan::default();
    let mut eligible: Vec<&Site> = Vec::new();

    for site in &state.sites {
        if is_disallowed_owner(&site.username) {
            warn!(
                "Skipping root-owned site {} ({}) for pool generation",
                site.id, site.domain
            );
            plan.skipped.push(site.id.clone());
            continue;
        }
        eligible.push(site);
    }

    check_domains(&eligible)?;

    let mut site_counts: HashMap<&str, usize> = HashMap::new();
    let mut key_counts: HashMap<(&str, String), usize> = HashMap::new();
    for site in &eligible {
        *site_counts.entry(site.username.as_str()).or_default() += 1;
        *key_counts
            .entry((site.username.as_str(), socket_id(&site.id)))
            .or_default() += 1;
    }

    let mut seen_keys: BTreeSet<(String, String)> = BTreeSet::new();
    for site in eligible {
        let version = normalize_version(&site.php_version).ok_or_else(|| {
            AgentError::Validation(format!(
                "invalid php version {:?} for site {}",
                site.php_version, site.domain
            ))
        })?;

        let id12 = socket_id(&site.id);
        let key = if key_counts[&(site.username.as_str(), id12.clone())] > 1 {
            format!("{}-{}", id12, id_digest(&site.id))
        } else {
            id12
        };
        if !seen_keys.insert((site.username.clone(), key.clone())) {
            return Err(AgentError::Validation(format!(
                "site id {} is used by more than one site of {}",
                site.id, site.username
            )));
        }

        let pool_name = format!("{}{}-{}", SITE_POOL_PREFIX, site.username, key);
        let socket = layout
            .tenant_run_dir(&site.username)
            .join(format!("php-{}-v{}.sock", key, version.replace('.', "")));
        let tuning = site_pool_tuning(
            state.ram_mb,
            state.memory_limit(&site.username),
            site_counts[site.username.as_str()],
        );

        plan.pools.push(SitePool {
            site_id: site.id.clone(),
            username: site.username.clone(),
            domain: site.domain.clone(),
            conf_path: layout.pool_dir(&version).join(format!("{}.conf", pool_name)),
            version,
            key,
            pool_name,
            socket,
            document_root: site.document_root.clone(),
            tmp_dir: layout.tenant_tmp_dir(&site.username),
            error_log: layout.site_error_log(&site.username, &site.slug),
            tuning,
            php: site.php.clone(),
        });
    }

    Ok(plan)
}

fn check_domains(sites: &[&Site]) -> Result<()> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for site in sites {
        for d in &site.domains {
            let domain = d.domain.to_ascii_lowercase();
            if let Some(other) = owners.insert(domain, &site.id)
                && other != site.id
            {
                return Err(AgentError::Validation(format!(
                    "domain {} is bound to both site {} and site {}",
                    d.domain, other, site.id
                )));
            }
        }
    }
    Ok(())
}
