use super::*;
use crate::reconcile::plan::plan_pools;
use crate::reconcile::snapshot::DesiredState;
use crate::model::Site;
use std::path::Path;

#[test]
fn site_pool_carries_tuning_and_limits() {
    let mut site = Site::new("s1", "alice", "a.test", "/srv/home/alice/apps/a/public");
    site.slug = "a".into();
    site.php.memory_limit = "512M".into();
    site.php.max_input_vars = 10000;
    let layout = Layout::rooted(Path::new("/srv"));
    let plan = plan_pools(&DesiredState::new(vec![site], 1024), &layout).unwrap();

    let text = render_site_pool(&plan.pools[0]);
    assert!(text.starts_with("[fastcp-site-alice-s1]\nuser = alice\ngroup = alice\n"));
    assert!(text.contains("listen = /srv/home/alice/.fastcp/run/php-s1-v84.sock\n"));
    assert!(text.contains("listen.mode = 0660\n\npm = ondemand\n"));
    assert!(text.contains("pm.max_children = 2\n"));
    assert!(text.contains("pm.process_idle_timeout = 8s\npm.max_requests = 400\n\n"));
    assert!(text.contains("php_admin_value[upload_tmp_dir] = /srv/home/alice/.tmp/uploads\n"));
    assert!(text.contains("php_admin_value[session.save_path] = /srv/home/alice/.tmp/sessions\n"));
    assert!(text.contains("php_admin_value[memory_limit] = 512M\n"));
    assert!(text.contains("php_admin_value[max_input_vars] = 10000\n"));
    assert!(text.ends_with("php_admin_value[error_log] = /srv/var/log/fastcp/php-alice-a-error.log\n"));
}

#[test]
fn admin_pool_uses_www_data_and_layout_paths() {
    let layout = Layout::rooted(Path::new("/srv"));
    let text = render_admin_pool(&layout, 6);

    assert!(text.starts_with("[fastcp-phpmyadmin]\nuser = www-data\n"));
    assert!(text.contains("listen = /srv/opt/fastcp/run/phpmyadmin.sock\n"));
    assert!(text.contains("pm.max_children = 6\n"));
    assert!(text.contains(
        "php_admin_value[open_basedir] = /srv/opt/fastcp/phpmyadmin:/srv/opt/fastcp/run/phpmyadmin-tmp:/tmp:/usr/share/php\n"
    ));
}
