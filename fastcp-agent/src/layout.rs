//! Host filesystem layout.
//!
//! Every path the agent reads or writes is derived from a [`Layout`], so a
//! whole host can be relocated under a temporary root for tests or for
//! non-standard installs (the `paths` section of the agent config).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Layout {
    /// Parent of tenant home directories
    pub home_base: PathBuf,
    /// Install root holding `run/`, `config/`, `data/`, `phpmyadmin/`
    pub fastcp_root: PathBuf,
    /// Root of per-version PHP configuration (`<php_root>/<ver>/fpm/...`)
    pub php_root: PathBuf,
    /// Where FPM masters write their pid files
    pub php_run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub suspended_dir: PathBuf,
    /// Writable systemd unit directory
    pub systemd_dir: PathBuf,
    /// Directories searched for `php<ver>-fpm.service`
    pub unit_dirs: Vec<PathBuf>,
    pub meminfo: PathBuf,
    pub mysql_conf_dir: PathBuf,
    pub ssh_dir: PathBuf,
    pub tmpfiles_dir: PathBuf,
    pub caddy_binary: PathBuf,
    /// Scripts run to build the login banner
    pub motd_dir: PathBuf,
    pub swap_file: PathBuf,
    pub fstab: PathBuf,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            home_base: PathBuf::from("/home"),
            fastcp_root: PathBuf::from("/opt/fastcp"),
            php_root: PathBuf::from("/etc/php"),
            php_run_dir: PathBuf::from("/run/php"),
            log_dir: PathBuf::from("/var/log/fastcp"),
            suspended_dir: PathBuf::from("/var/www/suspended"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            unit_dirs: vec![
                PathBuf::from("/etc/systemd/system"),
                PathBuf::from("/lib/systemd/system"),
                PathBuf::from("/usr/lib/systemd/system"),
            ],
            meminfo: PathBuf::from("/proc/meminfo"),
            mysql_conf_dir: PathBuf::from("/etc/mysql/conf.d"),
            ssh_dir: PathBuf::from("/etc/ssh"),
            tmpfiles_dir: PathBuf::from("/etc/tmpfiles.d"),
            caddy_binary: PathBuf::from("/usr/local/bin/caddy"),
            motd_dir: PathBuf::from("/etc/update-motd.d"),
            swap_file: PathBuf::from("/swapfile"),
            fstab: PathBuf::from("/etc/fstab"),
        }
    }
}

impl Layout {
    /// The default layout re-rooted under `root`.
    pub fn rooted(root: &Path) -> Self {
        let base = Layout::default();
        let under = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            home_base: under(&base.home_base),
            fastcp_root: under(&base.fastcp_root),
            php_root: under(&base.php_root),
            php_run_dir: under(&base.php_run_dir),
            log_dir: under(&base.log_dir),
            suspended_dir: under(&base.suspended_dir),
            systemd_dir: under(&base.systemd_dir),
            unit_dirs: base.unit_dirs.iter().map(|p| under(p)).collect(),
            meminfo: under(&base.meminfo),
            mysql_conf_dir: under(&base.mysql_conf_dir),
            ssh_dir: under(&base.ssh_dir),
            tmpfiles_dir: under(&base.tmpfiles_dir),
            caddy_binary: under(&base.caddy_binary),
            motd_dir: under(&base.motd_dir),
            swap_file: under(&base.swap_file),
            fstab: under(&base.fstab),
        }
    }

    // =========================================================================
    // Install root
    // =========================================================================

    pub fn run_dir(&self) -> PathBuf {
        self.fastcp_root.join("run")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.fastcp_root.join("config")
    }

    pub fn agent_socket(&self) -> PathBuf {
        self.run_dir().join("agent.sock")
    }

    pub fn caddyfile(&self) -> PathBuf {
        self.config_dir().join("Caddyfile")
    }

    pub fn site_db(&self) -> PathBuf {
        self.fastcp_root.join("data").join("fastcp.db")
    }

    pub fn caddy_settings(&self) -> PathBuf {
        self.config_dir().join("caddy-settings.json")
    }

    pub fn php_defaults(&self) -> PathBuf {
        self.config_dir().join("php-defaults.json")
    }

    pub fn php_ini_dir(&self) -> PathBuf {
        self.config_dir().join("php")
    }

    pub fn users_config_dir(&self) -> PathBuf {
        self.config_dir().join("users")
    }

    pub fn tenant_config_dir(&self, username: &str) -> PathBuf {
        self.users_config_dir().join(username)
    }

    pub fn phpmyadmin_dir(&self) -> PathBuf {
        self.fastcp_root.join("phpmyadmin")
    }

    pub fn admin_socket(&self) -> PathBuf {
        self.run_dir().join("phpmyadmin.sock")
    }

    pub fn admin_tmp_dir(&self) -> PathBuf {
        self.run_dir().join("phpmyadmin-tmp")
    }

    pub fn suspended_page(&self) -> PathBuf {
        self.suspended_dir.join("index.html")
    }

    // =========================================================================
    // PHP-FPM
    // =========================================================================

    pub fn pool_dir(&self, version: &str) -> PathBuf {
        self.php_root.join(version).join("fpm").join("pool.d")
    }

    pub fn fpm_pid_file(&self, version: &str) -> PathBuf {
        self.php_run_dir.join(format!("php{}-fpm.pid", version))
    }

    // =========================================================================
    // Tenants
    // =========================================================================

    pub fn tenant_home(&self, username: &str) -> PathBuf {
        self.home_base.join(username)
    }

    pub fn tenant_apps_dir(&self, username: &str) -> PathBuf {
        self.tenant_home(username).join("apps")
    }

    pub fn tenant_fastcp_dir(&self, username: &str) -> PathBuf {
        self.tenant_home(username).join(".fastcp")
    }

    /// Directory holding the tenant's pool sockets
    pub fn tenant_run_dir(&self, username: &str) -> PathBuf {
        self.tenant_fastcp_dir(username).join("run")
    }

    pub fn tenant_tmp_dir(&self, username: &str) -> PathBuf {
        self.tenant_home(username).join(".tmp")
    }

    pub fn tenant_error_log(&self, username: &str) -> PathBuf {
        self.log_dir.join(format!("php-{}-error.log", username))
    }

    pub fn site_error_log(&self, username: &str, slug: &str) -> PathBuf {
        self.log_dir.join(format!("php-{}-{}-error.log", username, slug))
    }

    /// Access log directory for one site, keyed by its domain
    pub fn site_access_log_dir(&self, username: &str, domain: &str) -> PathBuf {
        self.tenant_apps_dir(username)
            .join(domain.replace('.', "_"))
            .join("logs")
    }

    // =========================================================================
    // System services
    // =========================================================================

    pub fn unit_file(&self, unit: &str) -> PathBuf {
        self.systemd_dir.join(unit)
    }

    pub fn user_slice_dir(&self, uid: u32) -> PathBuf {
        self.systemd_dir.join(format!("user-{}.slice.d", uid))
    }

    pub fn mysql_tuning_file(&self) -> PathBuf {
        self.mysql_conf_dir.join("fastcp.cnf")
    }

    pub fn sshd_main_config(&self) -> PathBuf {
        self.ssh_dir.join("sshd_config")
    }

    pub fn sshd_dropin_dir(&self) -> PathBuf {
        self.ssh_dir.join("sshd_config.d")
    }

    pub fn sshd_fastcp_config(&self) -> PathBuf {
        self.sshd_dropin_dir().join("fastcp.conf")
    }
}

#[cfg(test)]
mod tests;
