//! Desired state captured once at the start of a pass.

use std::collections::{BTreeMap, BTreeSet};

use fastcp_protocol::payload::CaddyConfig;
use tracing::debug;

use crate::errors::Result;
use crate::layout::Layout;
use crate::model::Site;
use crate::settings::load_caddy_settings;
use crate::store::SiteStore;
use crate::tuning::detect_ram_mb;

/// Everything a pass renders from. Nothing downstream reads the store or the
/// settings files again.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    /// Sorted by site id
    pub sites: Vec<Site>,
    pub suspended: BTreeSet<String>,
    /// Tenant memory ceilings in MB; absent or `<= 0` is unlimited
    pub memory_limits: BTreeMap<String, i64>,
    pub ram_mb: u64,
    pub proxy: CaddyConfig,
    /// HTTP-only addresses and `auto_https off`
    pub dev_mode: bool,
}

impl DesiredState {
    pub async fn load(store: &dyn SiteStore, layout: &Layout, dev_mode: bool) -> Result<Self> {
        let ram_mb = detect_ram_mb(&layout.meminfo);
        let suspended = store.suspended_users().await?;
        let sites = match store.sites().await? {
            Some(sites) => sites,
            None => {
                debug!("No site table yet; reconciling an empty host");
                Vec::new()
            }
        };
        let memory_limits = store.memory_limits().await?;

        Ok(Self::new(sites, ram_mb)
            .with_suspended(suspended)
            .with_memory_limits(memory_limits)
            .with_proxy(load_caddy_settings(layout, ram_mb))
            .with_dev_mode(dev_mode))
    }

    /// A snapshot with default proxy settings for `ram_mb`.
    pub fn new(mut sites: Vec<Site>, ram_mb: u64) -> Self {
        sites.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            sites,
            suspended: BTreeSet::new(),
            memory_limits: BTreeMap::new(),
            ram_mb,
            proxy: crate::tuning::default_caddy_config(ram_mb),
            dev_mode: false,
        }
    }

    pub fn with_suspended(mut self, suspended: BTreeSet<String>) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn with_memory_limits(mut self, limits: BTreeMap<String, i64>) -> Self {
        self.memory_limits = limits;
        self
    }

    pub fn with_proxy(mut self, proxy: CaddyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    pub fn is_suspended(&self, username: &str) -> bool {
        self.suspended.contains(username)
    }

    pub fn memory_limit(&self, username: &str) -> i64 {
        self.memory_limits.get(username).copied().unwrap_or(0)
    }
}
