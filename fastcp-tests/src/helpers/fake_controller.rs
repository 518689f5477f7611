//! Recording process controller that plays the FPM masters and the proxy.
//!
//! A reload or restart of a PHP version binds a real Unix listener for every
//! `listen = ` line in that version's pool directory, so the engine's
//! readiness checks see exactly what a live master would serve.

use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fastcp_agent::errors::{AgentError, Result};
use fastcp_agent::layout::Layout;
use fastcp_agent::lifecycle::ProcessController;
use parking_lot::Mutex;

/// When the fake brings sockets up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Reloads and restarts both bind
    #[default]
    None,
    /// Reloads succeed but bind nothing; the forced restart binds
    BindOnRestartOnly,
    /// Reloads fail outright; the forced restart binds
    ReloadErrors,
    /// Nothing ever binds
    NeverBind,
    /// Starting the proxy fails
    ProxyStartFails,
}

pub struct FakeController {
    layout: Layout,
    managed: bool,
    mode: Mutex<FailMode>,
    proxy_running: AtomicBool,
    calls: Mutex<Vec<String>>,
    /// Caddyfile presence observed at each FPM reload or restart
    caddyfile_at_fpm: Mutex<Vec<bool>>,
    /// Sockets accepting connections when the proxy was started or reloaded
    live_at_proxy: Mutex<Vec<PathBuf>>,
    listeners: Mutex<Vec<(PathBuf, UnixListener)>>,
}

impl FakeController {
    /// A host without a service manager; FPM is driven directly.
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            managed: false,
            mode: Mutex::new(FailMode::None),
            proxy_running: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            caddyfile_at_fpm: Mutex::new(Vec::new()),
            live_at_proxy: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// A systemd host; FPM is driven through `php<ver>-fpm` units.
    pub fn managed(layout: Layout) -> Self {
        Self {
            managed: true,
            ..Self::new(layout)
        }
    }

    pub fn set_mode(&self, mode: FailMode) {
        *self.mode.lock() = mode;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn caddyfile_at_fpm(&self) -> Vec<bool> {
        self.caddyfile_at_fpm.lock().clone()
    }

    pub fn live_at_proxy(&self) -> Vec<PathBuf> {
        self.live_at_proxy.lock().clone()
    }

    /// Drop every listener, as if all masters died. Socket files stay behind.
    pub fn kill_masters(&self) {
        self.listeners.lock().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    /// Socket paths named by the pool files of `version`.
    fn pool_sockets(&self, version: &str) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.layout.pool_dir(version)) else {
            return Vec::new();
        };
        let mut sockets = Vec::new();
        for entry in entries.flatten() {
            let Ok(text) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for line in text.lines() {
                if let Some((key, value)) = line.split_once('=')
                    && key.trim() == "listen"
                {
                    sockets.push(PathBuf::from(value.trim()));
                }
            }
        }
        sockets.sort();
        sockets
    }

    fn bind_version(&self, version: &str) -> Result<()> {
        let sockets = self.pool_sockets(version);
        let mut listeners = self.listeners.lock();
        listeners.retain(|(path, _)| path.exists());
        for path in sockets {
            if listeners.iter().any(|(p, _)| p == &path) {
                continue;
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::io("create", parent, e))?;
            }
            let _ = std::fs::remove_file(&path);
            let listener =
                UnixListener::bind(&path).map_err(|e| AgentError::io("bind", path.as_path(), e))?;
            listeners.push((path, listener));
        }
        Ok(())
    }

    fn fpm_action(&self, version: &str, restart: bool) -> Result<()> {
        self.caddyfile_at_fpm
            .lock()
            .push(self.layout.caddyfile().exists());
        let mode = *self.mode.lock();
        match (mode, restart) {
            (FailMode::NeverBind, _) => Ok(()),
            (FailMode::BindOnRestartOnly, false) => Ok(()),
            (FailMode::ReloadErrors, false) => {
                Err(AgentError::Operation(format!("php {} reload refused", version)))
            }
            _ => self.bind_version(version),
        }
    }

    fn snapshot_live(&self) {
        let live: Vec<PathBuf> = self
            .listeners
            .lock()
            .iter()
            .map(|(p, _)| p.clone())
            .filter(|p| p.exists())
            .collect();
        *self.live_at_proxy.lock() = live;
    }
}

/// `php8.4-fpm` → `8.4`
fn unit_version(unit: &str) -> Option<&str> {
    unit.strip_prefix("php")?.strip_suffix("-fpm")
}

#[async_trait]
impl ProcessController for FakeController {
    async fn has_service_manager(&self) -> bool {
        self.managed
    }

    async fn enable_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("enable {}", unit));
        Ok(())
    }

    async fn reload_or_restart_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("reload-or-restart {}", unit));
        match unit_version(unit) {
            Some(version) => self.fpm_action(version, false),
            None => Ok(()),
        }
    }

    async fn reload_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("reload {}", unit));
        Ok(())
    }

    async fn restart_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("restart {}", unit));
        match unit_version(unit) {
            Some(version) => self.fpm_action(version, true),
            None => Ok(()),
        }
    }

    async fn unit_active(&self, unit: &str) -> bool {
        unit != "fastcp-caddy" || self.proxy_running.load(Ordering::SeqCst)
    }

    async fn unit_enabled(&self, _unit: &str) -> bool {
        self.managed
    }

    async fn disable_unit_now(&self, unit: &str) -> Result<()> {
        self.record(format!("disable {}", unit));
        Ok(())
    }

    async fn daemon_reload(&self) -> Result<()> {
        self.record("daemon-reload".into());
        Ok(())
    }

    async fn fpm_reload_direct(&self, version: &str) -> Result<()> {
        self.record(format!("direct-reload {}", version));
        self.fpm_action(version, false)
    }

    async fn fpm_restart_direct(&self, version: &str) -> Result<()> {
        self.record(format!("direct-restart {}", version));
        self.fpm_action(version, true)
    }

    async fn proxy_running(&self) -> bool {
        self.proxy_running.load(Ordering::SeqCst)
    }

    async fn start_proxy(&self) -> Result<()> {
        self.record("start-proxy".into());
        if *self.mode.lock() == FailMode::ProxyStartFails {
            return Err(AgentError::Operation("caddy exited immediately".into()));
        }
        self.snapshot_live();
        self.proxy_running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn reload_proxy(&self) -> Result<()> {
        self.record("reload-proxy".into());
        self.snapshot_live();
        Ok(())
    }
}

/// Whether something accepts connections on `path`.
pub fn is_live(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

#[cfg(test)]
mod tests;
