use super::*;

#[test]
fn default_paths_match_the_installed_host() {
    let layout = Layout::default();
    assert_eq!(layout.agent_socket(), PathBuf::from("/opt/fastcp/run/agent.sock"));
    assert_eq!(layout.caddyfile(), PathBuf::from("/opt/fastcp/config/Caddyfile"));
    assert_eq!(layout.site_db(), PathBuf::from("/opt/fastcp/data/fastcp.db"));
    assert_eq!(
        layout.caddy_settings(),
        PathBuf::from("/opt/fastcp/config/caddy-settings.json")
    );
    assert_eq!(layout.pool_dir("8.3"), PathBuf::from("/etc/php/8.3/fpm/pool.d"));
    assert_eq!(layout.fpm_pid_file("8.3"), PathBuf::from("/run/php/php8.3-fpm.pid"));
    assert_eq!(layout.admin_socket(), PathBuf::from("/opt/fastcp/run/phpmyadmin.sock"));
    assert_eq!(layout.suspended_page(), PathBuf::from("/var/www/suspended/index.html"));
    assert_eq!(layout.swap_file, PathBuf::from("/swapfile"));
    assert_eq!(layout.motd_dir, PathBuf::from("/etc/update-motd.d"));
}

#[test]
fn tenant_paths() {
    let layout = Layout::default();
    assert_eq!(layout.tenant_run_dir("alice"), PathBuf::from("/home/alice/.fastcp/run"));
    assert_eq!(layout.tenant_tmp_dir("alice"), PathBuf::from("/home/alice/.tmp"));
    assert_eq!(
        layout.site_error_log("alice", "blog"),
        PathBuf::from("/var/log/fastcp/php-alice-blog-error.log")
    );
    assert_eq!(
        layout.site_access_log_dir("alice", "blog.example.com"),
        PathBuf::from("/home/alice/apps/blog_example_com/logs")
    );
    assert_eq!(
        layout.user_slice_dir(1001),
        PathBuf::from("/etc/systemd/system/user-1001.slice.d")
    );
}

#[test]
fn rooted_layout_stays_under_root() {
    let root = Path::new("/tmp/host");
    let layout = Layout::rooted(root);
    assert_eq!(layout.caddyfile(), PathBuf::from("/tmp/host/opt/fastcp/config/Caddyfile"));
    assert_eq!(layout.meminfo, PathBuf::from("/tmp/host/proc/meminfo"));
    assert!(layout.unit_dirs.iter().all(|d| d.starts_with(root)));
    assert_eq!(layout.unit_dirs.len(), 3);
}

#[test]
fn partial_yaml_keeps_defaults() {
    let layout: Layout = serde_yaml::from_str("home_base: /srv/home\n").unwrap();
    assert_eq!(layout.home_base, PathBuf::from("/srv/home"));
    assert_eq!(layout.php_root, PathBuf::from("/etc/php"));
}

#[test]
fn unknown_yaml_keys_are_rejected() {
    assert!(serde_yaml::from_str::<Layout>("homes: /srv\n").is_err());
}
