use super::*;
use std::os::unix::net::UnixListener;
use std::sync::Arc;

use crate::lifecycle::testing::{BindOn, ScriptedController};
use crate::reconcile::{Engine, ReconcileActor};
use crate::store::SqliteStore;
use tempfile::TempDir;

fn context(dir: &TempDir, ctrl: Arc<ScriptedController>) -> AgentContext {
    let layout = Layout::rooted(dir.path());
    let store = Arc::new(SqliteStore::open(&layout.site_db()));
    let engine = Engine::new(layout.clone(), store.clone(), ctrl.clone());
    AgentContext {
        reconcile: ReconcileActor::spawn(engine),
        mysql_socket: dir.path().join("mysqld.sock"),
        layout,
        store,
        controller: ctrl,
    }
}

fn managed() -> Arc<ScriptedController> {
    Arc::new(ScriptedController::new(true, BindOn::Never, vec![]))
}

fn write(path: &Path, text: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

// ============================================================================
// Filesystem steps
// ============================================================================

#[test]
fn run_dir_is_created_and_tmpfiles_fragment_removed() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let fragment = layout.tmpfiles_dir.join("fastcp.conf");
    write(&fragment, "d /var/run/fastcp 1777 root root -\n");

    assert_eq!(ensure_run_dir(&layout), StepOutcome::Applied);
    assert!(layout.run_dir().is_dir());
    assert!(!fragment.exists());

    assert_eq!(ensure_run_dir(&layout), StepOutcome::Applied);
}

#[test]
fn only_absent_binaries_are_installed() {
    assert!(missing_packages(|_| true).is_empty());
    assert_eq!(missing_packages(|_| false), vec!["restic", "rsync"]);
    assert_eq!(missing_packages(|bin| bin == "rsync"), vec!["restic"]);
}

#[test]
fn php_ini_is_created_once() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let user_ini = layout.phpmyadmin_dir().join(".user.ini");
    write(&user_ini, "display_errors = On\n");

    assert_eq!(ensure_php_ini(&layout), StepOutcome::Applied);
    let ini = layout.php_ini_dir().join("99-fastcp.ini");
    assert_eq!(
        std::fs::read_to_string(&ini).unwrap(),
        "display_errors = Off\nerror_reporting = 22527\n"
    );
    assert!(!user_ini.exists());

    std::fs::write(&ini, "memory_limit = 1G\n").unwrap();
    assert_eq!(ensure_php_ini(&layout), StepOutcome::Applied);
    assert_eq!(std::fs::read_to_string(&ini).unwrap(), "memory_limit = 1G\n");
}

#[test]
fn legacy_shared_sockets_go_and_tenants_are_bootstrapped() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let run = layout.run_dir();
    write(&run.join("php-8.3.sock"), "");
    write(&run.join("php-8.3.pid"), "123");
    write(&run.join("agent.sock"), "");
    std::fs::create_dir_all(layout.tenant_config_dir("alice")).unwrap();

    assert_eq!(bootstrap_tenants(&layout), StepOutcome::Applied);
    assert!(!run.join("php-8.3.sock").exists());
    assert!(!run.join("php-8.3.pid").exists());
    assert!(run.join("agent.sock").exists());
    assert!(layout.tenant_run_dir("alice").is_dir());
    assert!(layout.tenant_tmp_dir("alice").join("sessions").is_dir());
    assert!(layout.tenant_error_log("alice").is_file());
}

// ============================================================================
// Unit drift
// ============================================================================

#[test]
fn agent_unit_loses_runtime_directory_lines() {
    let text = "[Service]\nRuntimeDirectory=fastcp\nRuntimeDirectoryMode=1777\nRuntimeDirectoryPreserve=yes\nExecStart=/opt/fastcp/bin/fastcp-agent\n";
    let fixed = repair_agent_unit(text).unwrap();
    assert_eq!(fixed, "[Service]\nExecStart=/opt/fastcp/bin/fastcp-agent\n");
    assert_eq!(repair_agent_unit(&fixed), None);
}

#[test]
fn panel_unit_points_at_new_run_dir() {
    let text = "Environment=FASTCP_AGENT_SOCKET=/var/run/fastcp/agent.sock\n";
    let fixed = repair_panel_unit(text, Path::new("/opt/fastcp/run")).unwrap();
    assert_eq!(fixed, "Environment=FASTCP_AGENT_SOCKET=/opt/fastcp/run/agent.sock\n");
    assert_eq!(repair_panel_unit(&fixed, Path::new("/opt/fastcp/run")), None);
}

#[test]
fn proxy_unit_gains_reload_and_drops_ini_scan_dir() {
    let layout = Layout::default();
    let text = "[Service]\nEnvironment=PHP_INI_SCAN_DIR=:/opt/fastcp/config/php\nRestart=always\nRestartSec=5\n";
    let fixed = repair_proxy_unit(text, &layout).unwrap();
    assert_eq!(
        fixed,
        "[Service]\nRestart=always\nRestartSec=5\nExecReload=/usr/local/bin/caddy reload --config /opt/fastcp/config/Caddyfile\n"
    );
    assert_eq!(repair_proxy_unit(&fixed, &layout), None);
}

#[tokio::test]
async fn unit_repairs_reload_the_manager_only_on_change() {
    let dir = TempDir::new().unwrap();
    let ctrl = managed();
    let ctx = context(&dir, ctrl.clone());
    let layout = &ctx.layout;
    write(
        &layout.unit_file("fastcp-agent.service"),
        "[Service]\nRuntimeDirectory=fastcp\nExecStart=/bin/true\n",
    );
    write(&layout.unit_file("fastcp-php@alice.service"), "[Service]\n");
    write(&layout.unit_file("fastcp-php-helper.service"), "[Service]\n");

    assert_eq!(repair_service_units(&ctx).await, StepOutcome::Applied);
    assert_eq!(
        ctrl.calls(),
        vec!["disable fastcp-php@alice.service", "daemon-reload"]
    );
    assert!(!layout.unit_file("fastcp-php@alice.service").exists());
    assert!(layout.unit_file("fastcp-php-helper.service").exists());
    let agent = std::fs::read_to_string(layout.unit_file("fastcp-agent.service")).unwrap();
    assert!(!agent.contains("RuntimeDirectory"));

    ctrl.calls.lock().clear();
    assert_eq!(repair_service_units(&ctx).await, StepOutcome::Applied);
    assert!(ctrl.calls().is_empty());
}

// ============================================================================
// Login banner, proxy binary, phpMyAdmin
// ============================================================================

#[test]
fn motd_is_written_only_where_the_banner_dir_exists() {
    use std::os::unix::fs::PermissionsExt;
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    assert_eq!(ensure_motd(&layout), StepOutcome::Applied);
    assert!(!layout.motd_dir.exists());

    std::fs::create_dir_all(&layout.motd_dir).unwrap();
    let script = layout.motd_dir.join("99-fastcp");
    write(&script, "#!/bin/sh\necho old\n");
    assert_eq!(ensure_motd(&layout), StepOutcome::Applied);
    let text = std::fs::read_to_string(&script).unwrap();
    assert!(text.starts_with("#!/bin/sh\n"));
    assert!(text.contains("panel_url=\"https://${panel_host}:2050\""));
    let mode = std::fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    let before = std::fs::metadata(&script).unwrap().modified().unwrap();
    assert_eq!(ensure_motd(&layout), StepOutcome::Applied);
    assert_eq!(std::fs::metadata(&script).unwrap().modified().unwrap(), before);
}

#[test]
fn caddy_download_follows_the_machine_arch() {
    assert_eq!(
        caddy_download_url("x86_64"),
        "https://caddyserver.com/api/download?os=linux&arch=amd64"
    );
    assert_eq!(
        caddy_download_url("aarch64"),
        "https://caddyserver.com/api/download?os=linux&arch=arm64"
    );
    assert!(caddy_download_url("").ends_with("arch=amd64"));
}

#[tokio::test]
async fn present_caddy_binary_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let ctrl = managed();
    let ctx = context(&dir, ctrl.clone());
    write(&ctx.layout.caddy_binary, "#!/bin/sh\n");

    assert_eq!(ensure_caddy_binary(&ctx).await, StepOutcome::Applied);
    assert_eq!(ensure_caddy_binary(&ctx).await, StepOutcome::Applied);
    assert!(ctrl.calls().is_empty());
    assert_eq!(std::fs::read_to_string(&ctx.layout.caddy_binary).unwrap(), "#!/bin/sh\n");
}

#[test]
fn blowfish_secret_is_read_from_an_existing_config() {
    let text = "<?php\n$cfg['blowfish_secret'] = 'abc123';\n$cfg['TempDir'] = '/tmp';\n";
    assert_eq!(existing_blowfish(text), Some("abc123"));
    assert_eq!(existing_blowfish("$cfg['blowfish_secret']='';\n"), None);
    assert_eq!(existing_blowfish("<?php\n"), None);
}

#[test]
fn phpmyadmin_config_keeps_its_secret_across_runs() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let config = layout.phpmyadmin_dir().join("config.inc.php");

    // Not installed: nothing to configure.
    assert_eq!(ensure_phpmyadmin_config(&layout), StepOutcome::Applied);
    assert!(!layout.phpmyadmin_dir().exists());

    let signon = layout.phpmyadmin_dir().join("signon.php");
    write(&signon, "<?php // legacy\n");
    assert_eq!(ensure_phpmyadmin_config(&layout), StepOutcome::Applied);
    assert!(!signon.exists());

    let first = std::fs::read_to_string(&config).unwrap();
    let secret = existing_blowfish(&first).unwrap().to_string();
    assert_eq!(secret.len(), 64);
    assert!(first.contains("$cfg['Servers'][1]['auth_type'] = 'config';"));
    let tmp = format!("$cfg['TempDir'] = '{}';", layout.admin_tmp_dir().display());
    assert!(first.contains(&tmp));

    assert_eq!(ensure_phpmyadmin_config(&layout), StepOutcome::Applied);
    assert_eq!(std::fs::read_to_string(&config).unwrap(), first);
}

#[test]
fn phpmyadmin_config_is_regenerated_around_an_old_secret() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let config = layout.phpmyadmin_dir().join("config.inc.php");
    write(
        &config,
        "<?php\n$cfg['blowfish_secret'] = 'keepme';\n$cfg['Servers'][1]['auth_type'] = 'signon';\n",
    );

    assert_eq!(ensure_phpmyadmin_config(&layout), StepOutcome::Applied);
    let text = std::fs::read_to_string(&config).unwrap();
    assert_eq!(text, render_pma_config("keepme", &layout.admin_tmp_dir()));
    assert!(!text.contains("signon"));
}

// ============================================================================
// Swap
// ============================================================================

#[test]
fn swap_only_for_small_hosts_without_enough() {
    let small = "MemTotal:        2009148 kB\nSwapTotal:             0 kB\n";
    assert!(needs_swap(small));
    let small_swapped = "MemTotal:        2009148 kB\nSwapTotal:       1048572 kB\n";
    assert!(!needs_swap(small_swapped));
    let big = "MemTotal:        8155832 kB\nSwapTotal:             0 kB\n";
    assert!(!needs_swap(big));
    assert!(needs_swap("MemTotal: 1000000 kB\n"));
    assert!(!needs_swap("SwapTotal: 0 kB\n"));
}

#[test]
fn swap_file_is_added_to_fstab_once() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    write(&layout.fstab, "UUID=abcd / ext4 defaults 0 1");

    assert!(ensure_fstab_entry(&layout.fstab, &layout.swap_file).unwrap());
    let line = format!("{} none swap sw 0 0\n", layout.swap_file.display());
    let text = std::fs::read_to_string(&layout.fstab).unwrap();
    assert_eq!(text, format!("UUID=abcd / ext4 defaults 0 1\n{}", line));

    assert!(!ensure_fstab_entry(&layout.fstab, &layout.swap_file).unwrap());
    assert_eq!(std::fs::read_to_string(&layout.fstab).unwrap(), text);
}

#[tokio::test]
async fn hosts_with_enough_swap_are_untouched() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    write(&layout.meminfo, "MemTotal: 8155832 kB\nSwapTotal: 0 kB\n");
    write(&layout.fstab, "");

    assert_eq!(ensure_swap(&layout).await, StepOutcome::Applied);
    assert!(!layout.swap_file.exists());
    assert_eq!(std::fs::read_to_string(&layout.fstab).unwrap(), "");
}

// ============================================================================
// MySQL tuning
// ============================================================================

#[tokio::test]
async fn mysql_tuning_is_written_once_and_restarts_the_server() {
    let dir = TempDir::new().unwrap();
    let ctrl = managed();
    let ctx = context(&dir, ctrl.clone());

    assert_eq!(ensure_mysql_tuning(&ctx).await, StepOutcome::Applied);
    let text = std::fs::read_to_string(ctx.layout.mysql_tuning_file()).unwrap();
    assert!(text.starts_with("[mysqld]\n# FastCP tuning (default low-resource profile)\n"));
    assert!(text.contains("innodb_buffer_pool_size = 128M"));
    assert!(text.contains("max_connections = 30"));
    assert!(text.contains("performance_schema = OFF"));
    assert_eq!(ctrl.calls(), vec!["reload-or-restart mysql"]);

    ctrl.calls.lock().clear();
    assert_eq!(ensure_mysql_tuning(&ctx).await, StepOutcome::Applied);
    assert!(ctrl.calls().is_empty());
}

// ============================================================================
// Sockets and the initial pass
// ============================================================================

#[tokio::test]
async fn only_unreachable_tenant_sockets_are_removed() {
    let dir = TempDir::new().unwrap();
    let ctx = context(&dir, managed());
    let layout = &ctx.layout;
    std::fs::create_dir_all(layout.tenant_config_dir("alice")).unwrap();
    let run = layout.tenant_run_dir("alice");
    std::fs::create_dir_all(&run).unwrap();

    let live = run.join("php-aaaa.sock");
    let _listener = UnixListener::bind(&live).unwrap();
    let dead = run.join("php-bbbb.sock");
    write(&dead, "");
    let other = run.join("notes.txt");
    write(&other, "");
    write(&run.join("php.pid"), "42");

    let removed = stale_sockets(&ctx).await.unwrap();
    assert_eq!(removed, vec![dead.clone()]);
    assert!(live.exists());
    assert!(!dead.exists());
    assert!(other.exists());
    assert!(!run.join("php.pid").exists());
}

#[tokio::test]
async fn initial_pass_runs_through_the_queue() {
    let dir = TempDir::new().unwrap();
    let ctrl = Arc::new(ScriptedController::new(false, BindOn::Never, vec![]));
    let ctx = context(&dir, ctrl.clone());

    assert_eq!(initial_pass(&ctx).await, StepOutcome::Applied);
    assert!(ctx.layout.caddyfile().is_file());
    assert_eq!(ctrl.calls(), vec!["start-proxy"]);
}
