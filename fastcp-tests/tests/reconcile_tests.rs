//! Reconciliation passes driven through `caddy.reload` on a fake host.

use fastcp_agent::model::SiteDomain;
use fastcp_tests::{FailMode, HostHarness, is_live};

// ============================================================================
// Convergence
// ============================================================================

#[tokio::test]
async fn second_pass_changes_nothing_and_reloads_the_proxy() {
    let host = HostHarness::new(&["8.3"]);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.3".into();
    host.store.add_site(site);

    let first = host.reload().await.unwrap();
    assert_eq!(first["action"], "started");
    let caddyfile = host.caddyfile().unwrap();
    let pools = host.site_pools("8.3");
    assert_eq!(pools.len(), 1);
    let pool_text = std::fs::read_to_string(&pools[0]).unwrap();

    let second = host.reload().await.unwrap();
    assert_eq!(second["action"], "reloaded");
    assert_eq!(second["pools_removed"], 0);
    assert_eq!(host.caddyfile().unwrap(), caddyfile);
    assert_eq!(host.site_pools("8.3"), pools);
    assert_eq!(std::fs::read_to_string(&pools[0]).unwrap(), pool_text);
}

#[tokio::test]
async fn removed_site_loses_its_pool() {
    let host = HostHarness::new(&["8.3"]);
    for (id, domain) in [("s1", "a.test"), ("s2", "b.test")] {
        let mut site = host.site(id, "alice", domain);
        site.php_version = "8.3".into();
        host.store.add_site(site);
    }
    host.reload().await.unwrap();
    assert_eq!(host.site_pools("8.3").len(), 2);

    host.store.remove_site("s2");
    host.controller.clear_calls();
    let report = host.reload().await.unwrap();

    assert_eq!(report["sites"], 1);
    assert_eq!(report["pools_removed"], 1);
    let pools = host.site_pools("8.3");
    assert_eq!(pools.len(), 1);
    assert!(pools[0].ends_with("fastcp-site-alice-s1.conf"));
    assert!(!host.caddyfile().unwrap().contains("b.test"));
    assert_eq!(host.controller.calls(), vec!["direct-reload 8.3", "reload-proxy"]);
}

#[tokio::test]
async fn version_change_moves_the_pool_and_reloads_both_versions() {
    let host = HostHarness::new(&["8.2", "8.3"]);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.2".into();
    host.store.set_sites(vec![site.clone()]);
    host.reload().await.unwrap();

    site.php_version = "8.3".into();
    host.store.set_sites(vec![site]);
    host.controller.clear_calls();
    let report = host.reload().await.unwrap();

    assert!(host.site_pools("8.2").is_empty());
    assert_eq!(host.site_pools("8.3").len(), 1);
    assert_eq!(report["php_versions"], serde_json::json!(["8.2", "8.3"]));
    assert_eq!(
        host.controller.calls(),
        vec!["direct-reload 8.2", "direct-reload 8.3", "reload-proxy"]
    );
    let caddyfile = host.caddyfile().unwrap();
    assert!(caddyfile.contains("php-s1-v83.sock"));
    assert!(!caddyfile.contains("php-s1-v82.sock"));
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn sockets_are_live_before_the_proxy_sees_the_caddyfile() {
    let host = HostHarness::new(&["8.3"]);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.3".into();
    host.store.add_site(site);

    host.reload().await.unwrap();

    assert_eq!(host.controller.caddyfile_at_fpm(), vec![false]);
    let sock = host.socket("alice", "php-s1-v83.sock");
    assert_eq!(host.controller.live_at_proxy(), vec![sock.clone()]);
    assert!(is_live(&sock));
    assert!(
        host.caddyfile()
            .unwrap()
            .contains(&format!("php_fastcgi unix/{}", sock.display()))
    );
}

// ============================================================================
// Rendering
// ============================================================================

#[tokio::test]
async fn suspended_tenant_keeps_pool_but_serves_placeholder() {
    let host = HostHarness::new(&["8.3"]);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.3".into();
    host.store.add_site(site);
    host.store.suspend("alice");

    host.reload().await.unwrap();

    assert_eq!(host.site_pools("8.3").len(), 1);
    let caddyfile = host.caddyfile().unwrap();
    assert!(caddyfile.contains("# Site: a.test (User: alice) [SUSPENDED]"));
    assert!(caddyfile.contains(&format!("root * {}", host.layout.suspended_dir.display())));
    assert!(!caddyfile.contains("php-s1-v83.sock"));
    assert!(host.layout.suspended_page().is_file());

    host.store.unsuspend("alice");
    host.reload().await.unwrap();
    let caddyfile = host.caddyfile().unwrap();
    assert!(!caddyfile.contains("[SUSPENDED]"));
    assert!(caddyfile.contains("php-s1-v83.sock"));
}

#[tokio::test]
async fn redirecting_alias_points_at_primary() {
    let host = HostHarness::new(&["8.3"]);
    let mut site = host.site("s1", "alice", "a.test").with_domains(vec![
        SiteDomain::primary("a.test"),
        SiteDomain::alias("www.a.test", true),
        SiteDomain::alias("old.test", false),
    ]);
    site.php_version = "8.3".into();
    host.store.add_site(site);

    host.reload().await.unwrap();

    let caddyfile = host.caddyfile().unwrap();
    assert!(caddyfile.contains("# Redirect: www.a.test -> a.test (User: alice)"));
    assert!(caddyfile.contains("redir https://a.test{uri} permanent"));
    assert!(caddyfile.contains("# Site: old.test (User: alice)\n"));
    assert_eq!(caddyfile.matches("php-s1-v83.sock").count(), 2);
}

#[tokio::test]
async fn colliding_site_ids_get_distinct_pools() {
    let host = HostHarness::new(&["8.3"]);
    for (id, domain) in [
        ("0123-4567-89ab-0001", "a.test"),
        ("0123-4567-89ab-0002", "b.test"),
    ] {
        let mut site = host.site(id, "alice", domain);
        site.php_version = "8.3".into();
        host.store.add_site(site);
    }

    host.reload().await.unwrap();

    let pools = host.site_pools("8.3");
    assert_eq!(pools.len(), 2);
    assert_ne!(pools[0], pools[1]);
    for pool in &pools {
        let name = pool.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("fastcp-site-alice-0123456789ab-"), "{}", name);
    }
    let live = host.controller.live_at_proxy();
    assert_eq!(live.len(), 2);
    assert_ne!(live[0], live[1]);
}

#[tokio::test]
async fn domain_claimed_twice_fails_before_writing() {
    let host = HostHarness::new(&["8.3"]);
    for id in ["s1", "s2"] {
        let mut site = host.site(id, "alice", "shared.test");
        site.php_version = "8.3".into();
        host.store.add_site(site);
    }

    let err = host.reload().await.unwrap_err();
    assert!(err.to_string().contains("shared.test"), "{}", err);
    assert!(host.site_pools("8.3").is_empty());
    assert!(host.caddyfile().is_none());
    assert!(host.controller.calls().is_empty());
}

// ============================================================================
// Escalation
// ============================================================================

#[tokio::test]
async fn unready_after_reload_forces_a_restart() {
    let host = HostHarness::managed(&["8.3"]);
    host.controller.set_mode(FailMode::BindOnRestartOnly);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.3".into();
    host.store.add_site(site);

    let report = host.reload().await.unwrap();

    assert_eq!(report["action"], "started");
    assert_eq!(
        host.controller.calls(),
        vec![
            "enable php8.3-fpm",
            "reload-or-restart php8.3-fpm",
            "restart php8.3-fpm",
            "start-proxy",
        ]
    );
    assert!(is_live(&host.socket("alice", "php-s1-v83.sock")));
}

#[tokio::test]
async fn failed_reload_is_a_warning_when_restart_recovers() {
    let host = HostHarness::new(&["8.3"]);
    host.controller.set_mode(FailMode::ReloadErrors);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.3".into();
    host.store.add_site(site);

    let report = host.reload().await.unwrap();

    let warnings: Vec<String> = serde_json::from_value(report["warnings"].clone()).unwrap();
    assert!(
        warnings.iter().any(|w| w.contains("reload refused")),
        "{:?}",
        warnings
    );
    assert_eq!(
        host.controller.calls(),
        vec!["direct-reload 8.3", "direct-restart 8.3", "start-proxy"]
    );
}

#[tokio::test]
async fn unreachable_socket_fails_the_pass_and_keeps_the_old_caddyfile() {
    let host = HostHarness::new(&["8.3"]);
    let mut site = host.site("s1", "alice", "a.test");
    site.php_version = "8.3".into();
    host.store.add_site(site);
    host.reload().await.unwrap();
    let before = host.caddyfile().unwrap();

    host.controller.kill_masters();
    host.controller.set_mode(FailMode::NeverBind);
    let mut other = host.site("s2", "bob", "b.test");
    other.php_version = "8.3".into();
    host.store.add_site(other);
    host.controller.clear_calls();

    let err = host.reload().await.unwrap_err().to_string();
    assert!(err.contains("sockets not available after restart"), "{}", err);
    assert!(err.contains("php-s1-v83.sock"), "{}", err);
    assert!(err.contains("php-s2-v83.sock"), "{}", err);
    assert_eq!(host.caddyfile().unwrap(), before);
    assert_eq!(
        host.controller.calls(),
        vec!["direct-reload 8.3", "direct-restart 8.3"]
    );
}

#[tokio::test]
async fn proxy_start_failure_is_reported() {
    let host = HostHarness::new(&["8.3"]);
    host.controller.set_mode(FailMode::ProxyStartFails);

    let err = host.reload().await.unwrap_err().to_string();
    assert!(err.contains("failed to start Caddy"), "{}", err);
    assert!(host.caddyfile().is_some());
}
