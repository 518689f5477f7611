//! Scripted controller for lifecycle unit tests.

use std::os::unix::net::UnixListener;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::controller::ProcessController;
use crate::errors::{AgentError, Result};

/// Which action brings the sockets up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOn {
    Reload,
    Restart,
    Never,
}

pub struct ScriptedController {
    pub managed: bool,
    pub bind_on: BindOn,
    pub fail_reload: bool,
    pub sockets: Vec<PathBuf>,
    pub calls: Mutex<Vec<String>>,
    listeners: Mutex<Vec<UnixListener>>,
}

impl ScriptedController {
    pub fn new(managed: bool, bind_on: BindOn, sockets: Vec<PathBuf>) -> Self {
        Self {
            managed,
            bind_on,
            fail_reload: false,
            sockets,
            calls: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn bind(&self) {
        let mut listeners = self.listeners.lock();
        for path in &self.sockets {
            let _ = std::fs::remove_file(path);
            listeners.push(UnixListener::bind(path).unwrap());
        }
    }

    fn on(&self, action: BindOn) -> Result<()> {
        if action == BindOn::Reload && self.fail_reload {
            return Err(AgentError::Operation("reload refused".into()));
        }
        if self.bind_on == action {
            self.bind();
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessController for ScriptedController {
    async fn has_service_manager(&self) -> bool {
        self.managed
    }

    async fn enable_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("enable {}", unit));
        Ok(())
    }

    async fn reload_or_restart_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("reload-or-restart {}", unit));
        self.on(BindOn::Reload)
    }

    async fn reload_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("reload {}", unit));
        Ok(())
    }

    async fn restart_unit(&self, unit: &str) -> Result<()> {
        self.record(format!("restart {}", unit));
        self.on(BindOn::Restart)
    }

    async fn unit_active(&self, _unit: &str) -> bool {
        true
    }

    async fn unit_enabled(&self, _unit: &str) -> bool {
        true
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
        self.on(BindOn::Reload)
    }

    async fn fpm_restart_direct(&self, version: &str) -> Result<()> {
        self.record(format!("direct-restart {}", version));
        self.on(BindOn::Restart)
    }

    async fn proxy_running(&self) -> bool {
        false
    }

    async fn start_proxy(&self) -> Result<()> {
        self.record("start-proxy".into());
        Ok(())
    }

    async fn reload_proxy(&self) -> Result<()> {
        self.record("reload-proxy".into());
        Ok(())
    }
}
