use super::*;
use crate::lifecycle::testing::{BindOn, ScriptedController};
use crate::model::Site;
use crate::store::SqliteStore;
use std::collections::BTreeSet;
use std::os::unix::net::UnixListener;
use tempfile::TempDir;

fn quick() -> ReadinessPolicy {
    ReadinessPolicy {
        short: Duration::from_millis(150),
        long: Duration::from_millis(300),
        interval: Duration::from_millis(20),
        dial: Duration::from_millis(200),
    }
}

struct Host {
    _dir: TempDir,
    layout: Layout,
}

impl Host {
    fn new(versions: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let layout = Layout::rooted(dir.path());
        for v in versions {
            std::fs::create_dir_all(layout.pool_dir(v)).unwrap();
        }
        Self { _dir: dir, layout }
    }

    fn engine(&self, ctrl: Arc<ScriptedController>) -> Engine {
        let store = Arc::new(SqliteStore::open(&self.layout.site_db()));
        Engine::new(self.layout.clone(), store, ctrl).with_policy(quick())
    }

    fn socket(&self, user: &str, name: &str) -> PathBuf {
        self.layout.tenant_run_dir(user).join(name)
    }
}

fn site(id: &str, user: &str, domain: &str) -> Site {
    Site::new(id, user, domain, &format!("/home/{}/apps/{}/public", user, domain))
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn pass_writes_pools_then_caddyfile_then_starts_proxy() {
    let host = Host::new(&["8.4"]);
    let sock = host.socket("alice", "php-s1-v84.sock");
    let ctrl = Arc::new(ScriptedController::new(
        false,
        BindOn::Reload,
        vec![sock.clone(), host.layout.admin_socket()],
    ));
    std::fs::create_dir_all(host.layout.run_dir()).unwrap();
    let engine = host.engine(ctrl.clone());

    let state = DesiredState::new(vec![site("s1", "alice", "a.test")], 2048);
    let report = engine.apply(state).await.unwrap();

    assert_eq!(report.sites, 1);
    assert_eq!(report.versions, vec!["8.4"]);
    assert_eq!(report.proxy_action, ProxyAction::Started);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);

    let pool_dir = host.layout.pool_dir("8.4");
    assert!(pool_dir.join("fastcp-site-alice-s1.conf").is_file());
    assert!(pool_dir.join(ADMIN_POOL_FILE).is_file());

    let caddyfile = std::fs::read_to_string(host.layout.caddyfile()).unwrap();
    assert!(caddyfile.contains(&format!("php_fastcgi unix/{}", sock.display())));
    assert!(host.layout.suspended_page().is_file());

    assert_eq!(ctrl.calls(), vec!["direct-reload 8.4", "start-proxy"]);

    let summary = report.summary();
    assert_eq!(summary.pools_written, 1);
    assert_eq!(summary.proxy_action, "started");
}

#[tokio::test]
async fn missing_site_table_reconciles_empty_host() {
    let host = Host::new(&[]);
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Reload, vec![]));
    let engine = host.engine(ctrl.clone());

    let report = engine.run_pass().await.unwrap();

    assert_eq!(report.sites, 0);
    assert!(report.versions.is_empty());
    let caddyfile = std::fs::read_to_string(host.layout.caddyfile()).unwrap();
    assert!(caddyfile.contains(":80, :443 {"));
    assert_eq!(ctrl.calls(), vec!["start-proxy"]);
}

// ============================================================================
// Garbage collection and legacy sockets
// ============================================================================

#[tokio::test]
async fn stale_pools_are_removed_and_their_version_reloaded() {
    let host = Host::new(&["8.3", "8.4"]);
    let stale = host.layout.pool_dir("8.3").join("fastcp-site-bob-old.conf");
    let foreign = host.layout.pool_dir("8.3").join("www.conf");
    std::fs::write(&stale, "[old]\n").unwrap();
    std::fs::write(&foreign, "[www]\n").unwrap();

    let sock = host.socket("alice", "php-s1-v84.sock");
    let ctrl = Arc::new(ScriptedController::new(
        false,
        BindOn::Reload,
        vec![sock, host.layout.admin_socket()],
    ));
    std::fs::create_dir_all(host.layout.run_dir()).unwrap();
    let engine = host.engine(ctrl.clone());

    let report = engine
        .apply(DesiredState::new(vec![site("s1", "alice", "a.test")], 2048))
        .await
        .unwrap();

    assert_eq!(report.pools_removed, vec![stale.clone()]);
    assert!(!stale.exists());
    assert!(foreign.exists());
    assert_eq!(report.versions, vec!["8.3", "8.4"]);
    assert_eq!(
        ctrl.calls(),
        vec!["direct-reload 8.3", "direct-reload 8.4", "start-proxy"]
    );
}

#[tokio::test]
async fn dead_legacy_socket_is_removed_live_one_kept() {
    let host = Host::new(&["8.3"]);
    let run = host.layout.tenant_run_dir("alice");
    std::fs::create_dir_all(&run).unwrap();

    let dead = run.join("php-s1.sock");
    drop(UnixListener::bind(&dead).unwrap());
    let live = run.join("php-s1-v82.sock");
    let _listener = UnixListener::bind(&live).unwrap();
    let other_site = run.join("php-s10.sock");
    std::fs::write(&other_site, "").unwrap();

    let sock = run.join("php-s1-v83.sock");
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Reload, vec![sock]));
    let engine = host.engine(ctrl);

    let mut s = site("s1", "alice", "a.test");
    s.php_version = "8.3".into();
    engine.apply(DesiredState::new(vec![s], 2048)).await.unwrap();

    assert!(!dead.exists());
    assert!(live.exists());
    assert!(other_site.exists());
}

#[tokio::test]
async fn superseded_sockets_survive_a_pass_that_fails_readiness() {
    let host = Host::new(&["8.3"]);
    let run = host.layout.tenant_run_dir("alice");
    std::fs::create_dir_all(&run).unwrap();
    let old = run.join("php-s1-v82.sock");
    drop(UnixListener::bind(&old).unwrap());

    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Never, vec![]));
    let engine = host.engine(ctrl);
    let mut s = site("s1", "alice", "a.test");
    s.php_version = "8.3".into();

    assert!(engine.apply(DesiredState::new(vec![s], 2048)).await.is_err());
    assert!(old.exists());
}

// ============================================================================
// Failure ordering
// ============================================================================

#[tokio::test]
async fn unready_sockets_leave_caddyfile_untouched() {
    let host = Host::new(&["8.3"]);
    std::fs::create_dir_all(host.layout.config_dir()).unwrap();
    std::fs::write(host.layout.caddyfile(), "previous\n").unwrap();

    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Never, vec![]));
    let engine = host.engine(ctrl.clone());
    let mut s = site("s1", "alice", "a.test");
    s.php_version = "8.3".into();

    let err = engine
        .apply(DesiredState::new(vec![s], 2048))
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::SocketsNotReady { .. }), "{}", err);
    assert!(err.to_string().contains("php-s1-v83.sock"));
    assert_eq!(
        std::fs::read_to_string(host.layout.caddyfile()).unwrap(),
        "previous\n"
    );
    assert!(!ctrl.calls().iter().any(|c| c.contains("proxy")));
}

#[tokio::test]
async fn validation_failure_writes_nothing() {
    let host = Host::new(&["8.4"]);
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Reload, vec![]));
    let engine = host.engine(ctrl.clone());
    let state = DesiredState::new(
        vec![site("s1", "alice", "a.test"), site("s2", "bob", "A.test")],
        2048,
    );

    let err = engine.apply(state).await.unwrap_err();

    assert!(matches!(err, AgentError::Validation(_)));
    assert_eq!(
        list_matching(&host.layout.pool_dir("8.4"), |_| true),
        Vec::<PathBuf>::new()
    );
    assert!(!host.layout.caddyfile().exists());
    assert!(ctrl.calls().is_empty());
}

#[tokio::test]
async fn missing_pool_dir_is_fatal() {
    let host = Host::new(&[]);
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Reload, vec![]));
    let engine = host.engine(ctrl);

    let err = engine
        .apply(DesiredState::new(vec![site("s1", "alice", "a.test")], 2048))
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::Validation(_)), "{:?}", err);
    assert_eq!(err.to_string(), "php 8.4 not installed: no FPM pool directory");
}

#[tokio::test]
async fn uninstalled_version_rejects_pass_before_any_pool_is_written() {
    let host = Host::new(&["8.4"]);
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Reload, vec![]));
    let engine = host.engine(ctrl.clone());
    let mut old = site("s2", "alice", "b.test");
    old.php_version = "8.1".into();
    let state = DesiredState::new(vec![site("s1", "alice", "a.test"), old], 2048);

    let err = engine.apply(state).await.unwrap_err();

    assert_eq!(err.to_string(), "php 8.1 not installed: no FPM pool directory");
    assert_eq!(
        list_matching(&host.layout.pool_dir("8.4"), |_| true),
        Vec::<PathBuf>::new()
    );
    assert!(!host.layout.tenant_run_dir("alice").exists());
    assert!(!host.layout.caddyfile().exists());
    assert!(ctrl.calls().is_empty());
}

// ============================================================================
// Suspension
// ============================================================================

#[tokio::test]
async fn suspended_tenant_keeps_pool_but_serves_placeholder() {
    let host = Host::new(&["8.3"]);
    let sock = host.socket("alice", "php-s1-v83.sock");
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Reload, vec![sock]));
    let engine = host.engine(ctrl);
    let mut s = site("s1", "alice", "a.test");
    s.php_version = "8.3".into();
    let state = DesiredState::new(vec![s], 2048)
        .with_suspended(BTreeSet::from(["alice".to_string()]));

    engine.apply(state).await.unwrap();

    assert!(
        host.layout
            .pool_dir("8.3")
            .join("fastcp-site-alice-s1.conf")
            .is_file()
    );
    let caddyfile = std::fs::read_to_string(host.layout.caddyfile()).unwrap();
    assert!(caddyfile.contains("[SUSPENDED]"));
    assert!(!caddyfile.contains("php-s1-v83.sock"));
}
