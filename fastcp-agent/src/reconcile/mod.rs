//! The reconciliation engine.
//!
//! One pass converts the desired state in the site store into pool files,
//! live FPM sockets, a Caddyfile, and a running proxy:
//!
//! 1. snapshot the store and settings ([`DesiredState`])
//! 2. plan every site pool ([`plan_pools`]) and check each version's pool
//!    directory; failures abort here, before anything is written
//! 3. write site pools
//! 4. delete site pool files that are no longer desired
//! 5. write the shared admin-tool pool
//! 6. apply each touched PHP version and wait for its sockets
//! 7. remove superseded sockets of each site that nothing listens on
//! 8. render and atomically replace the Caddyfile
//! 9. start or reload the proxy
//!
//! Any failure in 2-6 aborts the pass before the Caddyfile is touched, so the
//! proxy never references a socket that was not proven to accept connections.
//!
//! Passes are serialized by [`ReconcileHandle`]; nothing else should call
//! [`Engine::run_pass`] directly.

mod actor;
pub mod caddyfile;
pub mod plan;
pub mod pool;
pub mod snapshot;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fastcp_protocol::payload::ReconcileSummary;
use fastcp_unix::account;
use tracing::{debug, info};

pub use actor::{ReconcileActor, ReconcileHandle};
pub use caddyfile::render_caddyfile;
pub use plan::{PoolPlan, SitePool, plan_pools};
pub use snapshot::DesiredState;

use crate::errors::{AgentError, Result};
use crate::files::{chown_recursive, ensure_dir, list_matching, remove_file_if_exists, write_atomic};
use crate::layout::Layout;
use crate::lifecycle::{ProcessController, ReadinessPolicy, apply_version};
use crate::outcome::StepOutcome;
use crate::php::PREFERRED_VERSION;
use crate::store::SiteStore;
use crate::tenant::{bootstrap_tenant, ensure_owned_file};
use crate::tuning::admin_pool_max_children;

use plan::SITE_POOL_PREFIX;
use pool::{ADMIN_POOL_FILE, ADMIN_POOL_USER, admin_error_log, render_admin_pool, render_site_pool};

const SUSPENDED_PAGE: &str = include_str!("suspended.html");

/// Dial timeout when deciding whether a superseded socket is still in use.
const LEGACY_SOCKET_DIAL: Duration = Duration::from_millis(300);

/// What the proxy step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyAction {
    Started,
    Reloaded,
}

impl fmt::Display for ProxyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyAction::Started => write!(f, "started"),
            ProxyAction::Reloaded => write!(f, "reloaded"),
        }
    }
}

/// Outcome of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub sites: usize,
    pub pools_written: Vec<PathBuf>,
    pub pools_removed: Vec<PathBuf>,
    pub versions: Vec<String>,
    pub proxy_action: ProxyAction,
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    pub fn summary(&self) -> ReconcileSummary {
        ReconcileSummary {
            sites: self.sites,
            pools_written: self.pools_written.len(),
            pools_removed: self.pools_removed.len(),
            php_versions: self.versions.clone(),
            proxy_action: self.proxy_action.to_string(),
            warnings: self.warnings.clone(),
        }
    }
}

pub struct Engine {
    layout: Layout,
    store: Arc<dyn SiteStore>,
    controller: Arc<dyn ProcessController>,
    policy: ReadinessPolicy,
    dev_mode: bool,
}

impl Engine {
    pub fn new(
        layout: Layout,
        store: Arc<dyn SiteStore>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self {
            layout,
            store,
            controller,
            policy: ReadinessPolicy::default(),
            dev_mode: false,
        }
    }

    pub fn with_policy(mut self, policy: ReadinessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Snapshot the store and converge the host onto it.
    pub async fn run_pass(&self) -> Result<ReconcileReport> {
        let state = DesiredState::load(self.store.as_ref(), &self.layout, self.dev_mode).await?;
        self.apply(state).await
    }

    /// Converge the host onto `state`.
    pub async fn apply(&self, state: DesiredState) -> Result<ReconcileReport> {
        let plan = plan_pools(&state, &self.layout)?;
        self.check_runtimes(&plan)?;

        let mut warnings = Vec::new();
        StepOutcome::from_result("write suspended page", self.ensure_suspended_page())
            .record(&mut warnings);
        let mut sockets = plan.sockets_by_version();
        let mut versions: BTreeSet<String> = sockets.keys().cloned().collect();

        ensure_dir(&self.layout.log_dir, 0o755)?;
        let mut pools_written = Vec::with_capacity(plan.pools.len());
        for pool in &plan.pools {
            self.write_site_pool(pool, &mut warnings).await?;
            pools_written.push(pool.conf_path.clone());
        }

        let pools_removed = self.collect_garbage(&plan.conf_paths())?;
        for path in &pools_removed {
            if let Some(version) = pool_file_version(path) {
                versions.insert(version);
            }
        }

        match self.write_admin_pool(state.ram_mb) {
            Ok(true) => {
                versions.insert(PREFERRED_VERSION.to_string());
                sockets
                    .entry(PREFERRED_VERSION.to_string())
                    .or_default()
                    .push(self.layout.admin_socket());
            }
            Ok(false) => debug!("php {} not installed; no admin-tool pool", PREFERRED_VERSION),
            Err(e) => StepOutcome::from_result::<(), _>("write admin-tool pool", Err(e))
                .record(&mut warnings),
        }

        for version in &versions {
            let expected = sockets.get(version).map(Vec::as_slice).unwrap_or(&[]);
            apply_version(
                self.controller.as_ref(),
                &self.layout,
                &self.policy,
                version,
                expected,
                &mut warnings,
            )
            .await?;
        }

        for pool in &plan.pools {
            self.remove_superseded_sockets(pool).await;
        }

        if state.proxy.access_logs {
            for pool in &plan.pools {
                let dir = self.layout.site_access_log_dir(&pool.username, &pool.domain);
                StepOutcome::from_result("create access log directory", ensure_dir(&dir, 0o755))
                    .record(&mut warnings);
            }
        }

        let caddyfile = render_caddyfile(&state, &plan, &self.layout);
        ensure_dir(&self.layout.config_dir(), 0o755)?;
        write_atomic(&self.layout.caddyfile(), caddyfile.as_bytes(), 0o644)
            .map_err(|e| e.context("failed to regenerate Caddyfile"))?;

        let proxy_action = self.apply_proxy().await?;

        let report = ReconcileReport {
            sites: plan.pools.len(),
            pools_written,
            pools_removed,
            versions: versions.into_iter().collect(),
            proxy_action,
            warnings,
        };
        info!(
            "Reconciled {} site(s) across php {:?}; Caddy {}",
            report.sites, report.versions, report.proxy_action
        );
        Ok(report)
    }

    /// Every planned PHP version needs its pool directory before any pool is written.
    fn check_runtimes(&self, plan: &PoolPlan) -> Result<()> {
        let missing: Vec<String> = plan
            .sockets_by_version()
            .into_keys()
            .filter(|v| !self.layout.pool_dir(v).is_dir())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(AgentError::Validation(format!(
            "php {} not installed: no FPM pool directory",
            missing.join(", ")
        )))
    }

    fn ensure_suspended_page(&self) -> Result<()> {
        let page = self.layout.suspended_page();
        if page.exists() {
            return Ok(());
        }
        ensure_dir(&self.layout.suspended_dir, 0o755)?;
        write_atomic(&page, SUSPENDED_PAGE.as_bytes(), 0o644)
    }

    async fn write_site_pool(&self, pool: &SitePool, warnings: &mut Vec<String>) -> Result<()> {
        StepOutcome::from_result(
            &format!("bootstrap tenant {}", pool.username),
            bootstrap_tenant(&self.layout, &pool.username),
        )
        .record(warnings);

        let run_dir = self.layout.tenant_run_dir(&pool.username);
        ensure_dir(&run_dir, 0o755)?;
        StepOutcome::from_result(
            &format!("create error log for {}", pool.domain),
            ensure_owned_file(&pool.error_log, &pool.username),
        )
        .record(warnings);

        write_atomic(&pool.conf_path, render_site_pool(pool).as_bytes(), 0o644)
            .map_err(|e| e.context(format!("failed to write site FPM pool for {}", pool.domain)))?;
        debug!("Wrote pool {}", pool.conf_path.display());
        Ok(())
    }

    /// Remove this site's sockets from older naming schemes or other PHP
    /// versions, but only those nothing is listening on.
    async fn remove_superseded_sockets(&self, pool: &SitePool) {
        let run_dir = self.layout.tenant_run_dir(&pool.username);
        for path in list_matching(&run_dir, |name| pool.is_own_socket_name(name)) {
            if path == pool.socket {
                continue;
            }
            if self
                .controller
                .connect_unix_socket(&path, LEGACY_SOCKET_DIAL)
                .await
                .is_ok()
            {
                debug!("Keeping live superseded socket {}", path.display());
                continue;
            }
            match remove_file_if_exists(&path) {
                Ok(_) => debug!("Removed stale socket {}", path.display()),
                Err(e) => debug!("Cannot remove stale socket: {}", e),
            }
        }
    }

    /// Delete site pool files of every installed version that are not in `desired`.
    fn collect_garbage(&self, desired: &BTreeSet<PathBuf>) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.layout.php_root) else {
            return Ok(removed);
        };
        let mut version_dirs: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        version_dirs.sort();

        for version in version_dirs {
            let pool_dir = self.layout.pool_dir(&version);
            let stale = list_matching(&pool_dir, |name| {
                name.starts_with(SITE_POOL_PREFIX) && name.ends_with(".conf")
            });
            for path in stale {
                if desired.contains(&path) {
                    continue;
                }
                if remove_file_if_exists(&path)? {
                    debug!("Removed stale pool {}", path.display());
                    removed.push(path);
                }
            }
        }
        Ok(removed)
    }

    /// Returns whether the pool was written; it is skipped when the admin
    /// tool's PHP version is not installed.
    fn write_admin_pool(&self, ram_mb: u64) -> Result<bool> {
        let pool_dir = self.layout.pool_dir(PREFERRED_VERSION);
        if !pool_dir.is_dir() {
            return Ok(false);
        }

        let tmp = self.layout.admin_tmp_dir();
        ensure_dir(&tmp, 0o755)?;
        let log = admin_error_log(&self.layout);
        crate::files::touch(&log, 0o644)?;
        if let Some(acct) = account::lookup(ADMIN_POOL_USER) {
            chown_recursive(&tmp, acct.uid, acct.gid)?;
            crate::files::chown(&log, acct.uid, acct.gid)?;
        }

        let text = render_admin_pool(&self.layout, admin_pool_max_children(ram_mb));
        write_atomic(&pool_dir.join(ADMIN_POOL_FILE), text.as_bytes(), 0o644)?;
        Ok(true)
    }

    async fn apply_proxy(&self) -> Result<ProxyAction> {
        if self.controller.proxy_running().await {
            self.controller
                .reload_proxy()
                .await
                .map_err(|e| e.context("failed to reload Caddy"))?;
            Ok(ProxyAction::Reloaded)
        } else {
            info!("Caddy not running, starting it");
            self.controller
                .start_proxy()
                .await
                .map_err(|e| e.context("failed to start Caddy"))?;
            Ok(ProxyAction::Started)
        }
    }
}

/// `<php_root>/<ver>/fpm/pool.d/<file>` → `<ver>`
fn pool_file_version(path: &Path) -> Option<String> {
    let version = path.parent()?.parent()?.parent()?.file_name()?.to_str()?;
    crate::php::normalize_version(version)
}

#[cfg(test)]
mod tests;
