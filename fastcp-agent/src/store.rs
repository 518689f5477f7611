//! Read-only access to the control panel's site database.
//!
//! The panel owns the schema and its migrations; the agent only reads. Older
//! databases lack some columns, and a fresh install may not have the tables
//! at all, so every query degrades instead of failing the pass.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::model::{Counts, PhpLimits, Site, SiteDomain, UserDatabase};

/// Desired-state source consumed by the reconciliation engine and handlers.
#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Usernames whose sites are served the suspended page.
    async fn suspended_users(&self) -> Result<BTreeSet<String>>;

    /// All sites with their domains. `None` when there is no site table yet.
    async fn sites(&self) -> Result<Option<Vec<Site>>>;

    /// Per-tenant memory ceiling in MB; `-1` or `0` means unlimited.
    async fn memory_limits(&self) -> Result<BTreeMap<String, i64>>;

    async fn counts(&self) -> Result<Counts>;

    async fn user_databases(&self, username: &str) -> Result<Vec<UserDatabase>>;
}

const FULL_SITES_QUERY: &str = "SELECT id, domain, username, document_root, COALESCE(slug,''), \
     COALESCE(php_version,'8.4'), COALESCE(force_https,1), COALESCE(compression_enabled,1), \
     COALESCE(gzip_enabled,1), COALESCE(zstd_enabled,1), COALESCE(cache_control_enabled,0), \
     COALESCE(cache_control_value,''), COALESCE(php_memory_limit,'256M'), \
     COALESCE(php_post_max_size,'64M'), COALESCE(php_upload_max_filesize,'64M'), \
     COALESCE(php_max_execution_time,300), COALESCE(php_max_input_vars,5000) FROM sites";

const LEGACY_SITES_QUERY: &str =
    "SELECT id, domain, username, document_root, COALESCE(slug,'') FROM sites";

const DOMAINS_QUERY: &str = "SELECT site_id, domain, is_primary, COALESCE(redirect_to_primary, 0) \
     FROM site_domains ORDER BY is_primary DESC, rowid";

/// `SiteStore` over the panel's SQLite file, opened read-only.
pub struct SqliteStore {
    path: PathBuf,
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connections are made lazily, so the database may appear after startup.
    pub fn open(path: &Path) -> Self {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_lazy_with(options);
        Self {
            path: path.to_path_buf(),
            pool,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn available(&self) -> bool {
        self.path.is_file()
    }

    async fn load_sites(&self) -> Result<Option<Vec<Site>>> {
        match sqlx::query(FULL_SITES_QUERY).fetch_all(&self.pool).await {
            Ok(rows) => return Ok(Some(rows.iter().filter_map(decode_full_site).collect())),
            Err(e) if is_missing_table(&e) => return Ok(None),
            Err(e) => debug!("Full site query failed, trying legacy columns: {}", e),
        }

        match sqlx::query(LEGACY_SITES_QUERY).fetch_all(&self.pool).await {
            Ok(rows) => Ok(Some(rows.iter().filter_map(decode_legacy_site).collect())),
            Err(e) if is_missing_table(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_domains(&self) -> Result<BTreeMap<String, Vec<SiteDomain>>> {
        let rows = match sqlx::query(DOMAINS_QUERY).fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) if is_missing_table(&e) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };

        let mut domains: BTreeMap<String, Vec<SiteDomain>> = BTreeMap::new();
        for row in &rows {
            let decoded = (|| -> std::result::Result<_, sqlx::Error> {
                Ok((
                    row.try_get::<String, _>(0)?,
                    row.try_get::<String, _>(1)?,
                    row.try_get::<i64, _>(2)? != 0,
                    row.try_get::<i64, _>(3)? != 0,
                ))
            })();
            match decoded {
                Ok((site_id, domain, is_primary, redirect)) => {
                    domains.entry(site_id).or_default().push(SiteDomain {
                        domain,
                        is_primary,
                        redirect_to_primary: redirect && !is_primary,
                    });
                }
                Err(e) => warn!("Skipping unreadable site_domains row: {}", e),
            }
        }
        Ok(domains)
    }
}

#[async_trait]
impl SiteStore for SqliteStore {
    async fn suspended_users(&self) -> Result<BTreeSet<String>> {
        if !self.available() {
            return Ok(BTreeSet::new());
        }
        let rows = match sqlx::query("SELECT username FROM users WHERE is_suspended = 1")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table(&e) => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(rows
            .iter()
            .filter_map(|r| r.try_get::<String, _>(0).ok())
            .collect())
    }

    async fn sites(&self) -> Result<Option<Vec<Site>>> {
        if !self.available() {
            return Ok(None);
        }
        let Some(sites) = self.load_sites().await? else {
            return Ok(None);
        };
        let mut domains = self.load_domains().await?;
        Ok(Some(
            sites
                .into_iter()
                .map(|site| match domains.remove(&site.id) {
                    Some(list) => site.with_domains(list),
                    None => site,
                })
                .collect(),
        ))
    }

    async fn memory_limits(&self) -> Result<BTreeMap<String, i64>> {
        if !self.available() {
            return Ok(BTreeMap::new());
        }
        let rows = match sqlx::query("SELECT username, memory_mb FROM users")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table(&e) => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(rows
            .iter()
            .filter_map(|r| {
                let name = r.try_get::<String, _>(0).ok()?;
                let mb = r.try_get::<Option<i64>, _>(1).ok().flatten().unwrap_or(-1);
                Some((name, mb))
            })
            .collect())
    }

    async fn counts(&self) -> Result<Counts> {
        if !self.available() {
            return Ok(Counts::default());
        }
        Ok(Counts {
            users: self.count("users").await?,
            sites: self.count("sites").await?,
            databases: self.count("databases").await?,
        })
    }

    async fn user_databases(&self, username: &str) -> Result<Vec<UserDatabase>> {
        if !self.available() {
            return Ok(Vec::new());
        }
        let rows = match sqlx::query("SELECT db_name, db_user FROM databases WHERE username = ?")
            .bind(username)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) if is_missing_table(&e) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(UserDatabase {
                    db_name: r.try_get(0).ok()?,
                    db_user: r.try_get(1).ok()?,
                })
            })
            .collect())
    }
}

impl SqliteStore {
    async fn count(&self, table: &'static str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        match sqlx::query(&sql).fetch_one(&self.pool).await {
            Ok(row) => Ok(row.try_get::<i64, _>(0).unwrap_or(0)),
            Err(e) if is_missing_table(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_missing_table(e: &sqlx::Error) -> bool {
    e.to_string().contains("no such table")
}

fn decode_base(row: &SqliteRow) -> std::result::Result<Site, sqlx::Error> {
    let id: String = row.try_get(0)?;
    let domain: String = row.try_get(1)?;
    let username: String = row.try_get(2)?;
    let document_root: String = row.try_get(3)?;
    let mut site = Site::new(id, username, domain, document_root);
    site.slug = row.try_get(4)?;
    Ok(site)
}

fn decode_full_site(row: &SqliteRow) -> Option<Site> {
    let decoded = (|| -> std::result::Result<Site, sqlx::Error> {
        let mut site = decode_base(row)?;
        site.php_version = row.try_get(5)?;
        site.force_https = row.try_get::<i64, _>(6)? != 0;
        site.compression_enabled = row.try_get::<i64, _>(7)? != 0;
        site.gzip_enabled = row.try_get::<i64, _>(8)? != 0;
        site.zstd_enabled = row.try_get::<i64, _>(9)? != 0;
        site.cache_control_enabled = row.try_get::<i64, _>(10)? != 0;
        site.cache_control_value = row.try_get(11)?;
        site.php = PhpLimits {
            memory_limit: row.try_get(12)?,
            post_max_size: row.try_get(13)?,
            upload_max_filesize: row.try_get(14)?,
            max_execution_time: row.try_get(15)?,
            max_input_vars: row.try_get(16)?,
        };
        Ok(site)
    })();
    decoded
        .map_err(|e| warn!("Skipping unreadable site row: {}", e))
        .ok()
}

fn decode_legacy_site(row: &SqliteRow) -> Option<Site> {
    decode_base(row)
        .map_err(|e| warn!("Skipping unreadable site row: {}", e))
        .ok()
}
