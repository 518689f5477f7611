use super::*;
use std::os::unix::fs::PermissionsExt;
use tempfile::TempDir;

const NOBODY: &str = "fastcp-no-such-tenant";

fn mode(path: &Path) -> u32 {
    std::fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[test]
fn bootstrap_creates_tenant_tree() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());

    bootstrap_tenant(&layout, NOBODY).unwrap();

    assert!(layout.tenant_apps_dir(NOBODY).is_dir());
    assert!(layout.tenant_run_dir(NOBODY).is_dir());
    let tmp = layout.tenant_tmp_dir(NOBODY);
    assert_eq!(mode(&tmp), 0o700);
    for sub in TMP_SUBDIRS {
        assert_eq!(mode(&tmp.join(sub)), 0o700, "{}", sub);
    }
    assert!(layout.tenant_config_dir(NOBODY).is_dir());
    assert!(layout.tenant_error_log(NOBODY).is_file());
}

#[test]
fn bootstrap_is_idempotent_and_keeps_logs() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    bootstrap_tenant(&layout, NOBODY).unwrap();
    std::fs::write(layout.tenant_error_log(NOBODY), "previous\n").unwrap();

    bootstrap_tenant(&layout, NOBODY).unwrap();
    assert_eq!(
        std::fs::read_to_string(layout.tenant_error_log(NOBODY)).unwrap(),
        "previous\n"
    );
}

#[test]
fn known_tenants_lists_config_dirs() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    assert!(known_tenants(&layout).is_empty());

    for name in ["bob", "alice"] {
        std::fs::create_dir_all(layout.tenant_config_dir(name)).unwrap();
    }
    std::fs::write(layout.users_config_dir().join("stray-file"), "").unwrap();

    assert_eq!(known_tenants(&layout), vec!["alice", "bob"]);
}
