use super::*;
use tempfile::TempDir;

fn pool_file(layout: &Layout, version: &str, name: &str, socket: &Path) {
    let dir = layout.pool_dir(version);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join(name),
        format!("[{}]\nlisten = {}\nlisten.mode = 0660\n", name, socket.display()),
    )
    .unwrap();
}

#[test]
fn unit_names_map_to_versions() {
    assert_eq!(unit_version("php8.4-fpm"), Some("8.4"));
    assert_eq!(unit_version("fastcp-caddy"), None);
}

#[tokio::test]
async fn reload_binds_sockets_from_pool_files() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let sock = dir.path().join("run").join("a.sock");
    pool_file(&layout, "8.3", "a.conf", &sock);

    let ctrl = FakeController::new(layout);
    ctrl.fpm_reload_direct("8.3").await.unwrap();
    assert!(is_live(&sock));

    ctrl.kill_masters();
    assert!(sock.exists());
    assert!(!is_live(&sock));
}

#[tokio::test]
async fn restart_only_mode_defers_binding() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let sock = dir.path().join("b.sock");
    pool_file(&layout, "8.2", "b.conf", &sock);

    let ctrl = FakeController::managed(layout);
    ctrl.set_mode(FailMode::BindOnRestartOnly);
    ctrl.reload_or_restart_unit("php8.2-fpm").await.unwrap();
    assert!(!sock.exists());
    ctrl.restart_unit("php8.2-fpm").await.unwrap();
    assert!(is_live(&sock));
    assert_eq!(
        ctrl.calls(),
        vec!["reload-or-restart php8.2-fpm", "restart php8.2-fpm"]
    );
}

#[tokio::test]
async fn proxy_state_flips_on_start() {
    let dir = TempDir::new().unwrap();
    let ctrl = FakeController::new(Layout::rooted(dir.path()));
    assert!(!ctrl.proxy_running().await);
    ctrl.start_proxy().await.unwrap();
    assert!(ctrl.proxy_running().await);
    assert!(ctrl.unit_active("fastcp-caddy").await);
}
