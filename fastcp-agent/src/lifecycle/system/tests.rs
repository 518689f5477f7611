use super::*;
use tempfile::TempDir;

// ============================================================================
// Process inspection
// ============================================================================

#[test]
fn own_process_is_live_with_its_command_line() {
    let cmdline = live_process_cmdline(std::process::id()).unwrap();
    assert!(!cmdline.is_empty());
}

#[test]
fn reaped_child_is_not_live() {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    assert_eq!(live_process_cmdline(pid), None);
}

#[test]
fn unreaped_child_is_a_zombie_and_not_live() {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(live_process_cmdline(pid), None);
    child.wait().unwrap();
}

#[test]
fn running_children_are_found_by_name() {
    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id();
    std::thread::sleep(Duration::from_millis(100));

    assert!(live_pids_named("sleep").contains(&pid));
    assert!(live_pids_named("fastcp-no-such-process").is_empty());

    child.kill().unwrap();
    child.wait().unwrap();
}

// ============================================================================
// FPM master detection
// ============================================================================

#[test]
fn pid_file_pointing_at_a_non_master_is_ignored() {
    let dir = TempDir::new().unwrap();
    let layout = Layout::rooted(dir.path());
    let ctrl = SystemController::new(layout.clone());
    let pid_file = layout.fpm_pid_file("8.3");
    std::fs::create_dir_all(pid_file.parent().unwrap()).unwrap();

    assert_eq!(ctrl.live_fpm_master("8.3"), None);

    std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();
    assert_eq!(ctrl.live_fpm_master("8.3"), None);

    std::fs::write(&pid_file, "not-a-pid").unwrap();
    assert_eq!(ctrl.live_fpm_master("8.3"), None);
}
