use super::*;
use tempfile::TempDir;

#[test]
fn missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    assert_eq!(load_caddy_settings(&layout, 2048), default_caddy_config(2048));
}

#[test]
fn saved_settings_load_back() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let cfg = normalize_caddy_config(
        &CaddyConfig {
            profile: "high_throughput".into(),
            access_logs: true,
            ..Default::default()
        },
        4096,
    )
    .unwrap();

    save_caddy_settings(&layout, &cfg).unwrap();
    assert_eq!(load_caddy_settings(&layout, 4096), cfg);
}

#[test]
fn corrupt_or_invalid_files_fall_back() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    std::fs::create_dir_all(layout.config_dir()).unwrap();

    std::fs::write(layout.caddy_settings(), "{not json").unwrap();
    assert_eq!(load_caddy_settings(&layout, 1024), default_caddy_config(1024));

    std::fs::write(layout.caddy_settings(), r#"{"profile":"warp"}"#).unwrap();
    assert_eq!(load_caddy_settings(&layout, 1024), default_caddy_config(1024));

    std::fs::write(
        layout.caddy_settings(),
        r#"{"profile":"balanced","expert_mode":true,"idle_timeout":"1h"}"#,
    )
    .unwrap();
    assert_eq!(load_caddy_settings(&layout, 1024), default_caddy_config(1024));
}

#[test]
fn php_default_round_trip() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    assert_eq!(load_php_default(&layout), None);

    save_php_default(&layout, "8.3").unwrap();
    assert_eq!(load_php_default(&layout).as_deref(), Some("8.3"));

    let raw = std::fs::read_to_string(layout.php_defaults()).unwrap();
    assert!(!raw.contains("available_php_versions"));
}
