//! A throwaway host: temp layout, fakes, and the real engine behind them

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fastcp_agent::context::AgentContext;
use fastcp_agent::dispatch::Dispatcher;
use fastcp_agent::layout::Layout;
use fastcp_agent::lifecycle::ReadinessPolicy;
use fastcp_agent::model::Site;
use fastcp_agent::reconcile::{Engine, ReconcileActor};
use fastcp_protocol::protocol::Request;
use fastcp_protocol::server::Server;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use super::fake_controller::FakeController;
use super::memory_store::MemoryStore;
use super::wait_utils::wait_for_socket;

/// Deadlines short enough that the escalation path finishes in well under a second.
pub fn quick_policy() -> ReadinessPolicy {
    ReadinessPolicy {
        short: Duration::from_millis(150),
        long: Duration::from_millis(400),
        interval: Duration::from_millis(20),
        dial: Duration::from_millis(200),
    }
}

pub struct HostHarness {
    pub dir: TempDir,
    pub layout: Layout,
    pub store: Arc<MemoryStore>,
    pub controller: Arc<FakeController>,
    pub ctx: Arc<AgentContext>,
    pub dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl HostHarness {
    /// Host with the given PHP versions installed and no service manager.
    pub fn new(versions: &[&str]) -> Self {
        Self::build(versions, false)
    }

    /// Host with the given PHP versions installed as systemd units.
    pub fn managed(versions: &[&str]) -> Self {
        Self::build(versions, true)
    }

    fn build(versions: &[&str], managed: bool) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let layout = Layout::rooted(dir.path());
        for v in versions {
            std::fs::create_dir_all(layout.pool_dir(v)).expect("pool dir");
            if managed {
                let unit_dir = &layout.unit_dirs[1];
                std::fs::create_dir_all(unit_dir).expect("unit dir");
                std::fs::write(unit_dir.join(format!("php{}-fpm.service", v)), "[Service]\n")
                    .expect("unit file");
            }
        }
        std::fs::create_dir_all(layout.run_dir()).expect("run dir");

        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(if managed {
            FakeController::managed(layout.clone())
        } else {
            FakeController::new(layout.clone())
        });
        let engine = Engine::new(layout.clone(), store.clone(), controller.clone())
            .with_policy(quick_policy());
        let ctx = Arc::new(AgentContext {
            reconcile: ReconcileActor::spawn(engine),
            mysql_socket: dir.path().join("mysqld.sock"),
            layout: layout.clone(),
            store: store.clone(),
            controller: controller.clone(),
        });
        let dispatcher = Arc::new(Dispatcher::new(ctx.clone()));

        Self {
            dir,
            layout,
            store,
            controller,
            ctx,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// A site for `user` with its document root under the temp home.
    pub fn site(&self, id: &str, user: &str, domain: &str) -> Site {
        let root = self.layout.tenant_apps_dir(user).join(domain).join("public");
        Site::new(id, user, domain, root)
    }

    /// `caddy.reload` through the dispatch table.
    pub async fn reload(&self) -> fastcp_agent::errors::Result<Value> {
        self.dispatcher
            .call("caddy.reload", Value::Object(Default::default()))
            .await
    }

    pub fn caddyfile(&self) -> Option<String> {
        std::fs::read_to_string(self.layout.caddyfile()).ok()
    }

    /// Site pool files of `version`, sorted by name.
    pub fn site_pools(&self, version: &str) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(self.layout.pool_dir(version)) else {
            return Vec::new();
        };
        let mut pools: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("fastcp-site-"))
            })
            .collect();
        pools.sort();
        pools
    }

    pub fn socket(&self, user: &str, name: &str) -> PathBuf {
        self.layout.tenant_run_dir(user).join(name)
    }

    /// Serve the dispatcher on a socket under the temp root until the
    /// harness is dropped. Returns the socket path once it accepts.
    pub async fn serve(&self) -> PathBuf {
        let socket = self.dir.path().join("agent.sock");
        let dispatcher = Arc::clone(&self.dispatcher);
        let handler = move |request: Request| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.handle(request).await }
        };
        let server = Server::new(socket.clone(), handler).with_shutdown(self.shutdown.clone());
        let listener = server.bind().expect("bind agent socket");
        tokio::spawn(server.serve(listener));
        wait_for_socket(&socket, Duration::from_secs(2))
            .await
            .expect("agent socket ready");
        socket
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl Drop for HostHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
