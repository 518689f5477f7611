//! In-memory site store

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use fastcp_agent::errors::Result;
use fastcp_agent::model::{Counts, Site, UserDatabase};
use fastcp_agent::store::SiteStore;
use parking_lot::Mutex;

#[derive(Default)]
struct Records {
    /// `None` models a panel database without a site table
    sites: Option<Vec<Site>>,
    suspended: BTreeSet<String>,
    memory_limits: BTreeMap<String, i64>,
    databases: BTreeMap<String, Vec<UserDatabase>>,
}

/// `SiteStore` whose contents tests change between passes.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    /// A store with an empty site table.
    pub fn new() -> Self {
        let store = Self::default();
        store.records.lock().sites = Some(Vec::new());
        store
    }

    /// A store that behaves like a fresh install with no tables yet.
    pub fn without_tables() -> Self {
        Self::default()
    }

    pub fn set_sites(&self, sites: Vec<Site>) {
        self.records.lock().sites = Some(sites);
    }

    pub fn add_site(&self, site: Site) {
        self.records.lock().sites.get_or_insert_with(Vec::new).push(site);
    }

    pub fn remove_site(&self, id: &str) {
        if let Some(sites) = self.records.lock().sites.as_mut() {
            sites.retain(|s| s.id != id);
        }
    }

    pub fn suspend(&self, username: &str) {
        self.records.lock().suspended.insert(username.to_string());
    }

    pub fn unsuspend(&self, username: &str) {
        self.records.lock().suspended.remove(username);
    }

    pub fn set_memory_limit(&self, username: &str, mb: i64) {
        self.records.lock().memory_limits.insert(username.to_string(), mb);
    }

    pub fn add_database(&self, username: &str, db: UserDatabase) {
        self.records
            .lock()
            .databases
            .entry(username.to_string())
            .or_default()
            .push(db);
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn suspended_users(&self) -> Result<BTreeSet<String>> {
        Ok(self.records.lock().suspended.clone())
    }

    async fn sites(&self) -> Result<Option<Vec<Site>>> {
        Ok(self.records.lock().sites.clone())
    }

    async fn memory_limits(&self) -> Result<BTreeMap<String, i64>> {
        Ok(self.records.lock().memory_limits.clone())
    }

    async fn counts(&self) -> Result<Counts> {
        let records = self.records.lock();
        let sites = records.sites.as_ref().map(Vec::len).unwrap_or(0);
        let users: BTreeSet<&str> = records
            .sites
            .iter()
            .flatten()
            .map(|s| s.username.as_str())
            .collect();
        Ok(Counts {
            users: users.len() as i64,
            sites: sites as i64,
            databases: records.databases.values().map(Vec::len).sum::<usize>() as i64,
        })
    }

    async fn user_databases(&self, username: &str) -> Result<Vec<UserDatabase>> {
        Ok(self
            .records
            .lock()
            .databases
            .get(username)
            .cloned()
            .unwrap_or_default())
    }
}
