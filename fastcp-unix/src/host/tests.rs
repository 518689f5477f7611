use super::*;

#[test]
fn uname_reports_kernel() {
    let u = uname().unwrap();
    assert!(!u.sysname.is_empty());
    assert!(!u.machine.is_empty());
}

#[test]
fn disk_usage_of_tempdir() {
    let dir = tempfile::TempDir::new().unwrap();
    let usage = disk_usage(dir.path()).unwrap();
    assert!(usage.total > 0);
    assert!(usage.used <= usage.total);
}

#[test]
fn disk_usage_missing_path_errors() {
    assert!(disk_usage(Path::new("/definitely/not/here/fastcp")).is_err());
}

#[cfg(target_os = "linux")]
#[test]
fn load_reports_uptime() {
    let l = load().unwrap();
    assert!(l.uptime_secs > 0);
    assert!(l.load1 >= 0.0);
}
