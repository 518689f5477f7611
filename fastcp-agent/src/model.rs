//! Desired-state records read from the site store.

use std::path::PathBuf;

/// One domain bound to a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDomain {
    pub domain: String,
    pub is_primary: bool,
    /// Serve a permanent redirect to the site's primary domain instead of content
    pub redirect_to_primary: bool,
}

impl SiteDomain {
    pub fn primary(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            is_primary: true,
            redirect_to_primary: false,
        }
    }

    pub fn alias(domain: impl Into<String>, redirect_to_primary: bool) -> Self {
        Self {
            domain: domain.into(),
            is_primary: false,
            redirect_to_primary,
        }
    }
}

/// Per-site PHP directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhpLimits {
    pub memory_limit: String,
    pub post_max_size: String,
    pub upload_max_filesize: String,
    pub max_execution_time: i64,
    pub max_input_vars: i64,
}

impl Default for PhpLimits {
    fn default() -> Self {
        Self {
            memory_limit: "256M".to_string(),
            post_max_size: "64M".to_string(),
            upload_max_filesize: "64M".to_string(),
            max_execution_time: 300,
            max_input_vars: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub id: String,
    pub username: String,
    /// Main domain as stored on the site row
    pub domain: String,
    pub document_root: PathBuf,
    pub slug: String,
    pub php_version: String,
    pub force_https: bool,
    pub compression_enabled: bool,
    pub gzip_enabled: bool,
    pub zstd_enabled: bool,
    pub cache_control_enabled: bool,
    pub cache_control_value: String,
    pub php: PhpLimits,
    /// Primary first. Never empty.
    pub domains: Vec<SiteDomain>,
    pub primary_domain: String,
}

impl Site {
    /// A site with the store's column defaults and a single primary domain.
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        domain: impl Into<String>,
        document_root: impl Into<PathBuf>,
    ) -> Self {
        let domain = domain.into();
        Self {
            id: id.into(),
            username: username.into(),
            domains: vec![SiteDomain::primary(domain.clone())],
            primary_domain: domain.clone(),
            domain,
            document_root: document_root.into(),
            slug: String::new(),
            php_version: "8.4".to_string(),
            force_https: true,
            compression_enabled: true,
            gzip_enabled: true,
            zstd_enabled: true,
            cache_control_enabled: false,
            cache_control_value: String::new(),
            php: PhpLimits::default(),
        }
    }

    /// Replace the domain list. The primary (if any) becomes `primary_domain`.
    pub fn with_domains(mut self, domains: Vec<SiteDomain>) -> Self {
        if domains.is_empty() {
            return self;
        }
        if let Some(primary) = domains.iter().find(|d| d.is_primary) {
            self.primary_domain = primary.domain.clone();
        }
        self.domains = domains;
        self
    }
}

/// Host-wide record counts shown in `system.status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub users: i64,
    pub sites: i64,
    pub databases: i64,
}

/// A MySQL database owned by a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDatabase {
    pub db_name: String,
    pub db_user: String,
}
