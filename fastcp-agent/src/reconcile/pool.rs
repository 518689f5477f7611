//! FPM pool file templates.

use std::fmt::Write;

use super::plan::SitePool;
use crate::layout::Layout;

/// Pool file of the shared database-admin tool.
pub const ADMIN_POOL_FILE: &str = "fastcp-phpmyadmin.conf";
/// Account the admin tool runs as.
pub const ADMIN_POOL_USER: &str = "www-data";

pub fn render_site_pool(pool: &SitePool) -> String {
    let user = &pool.username;
    let tmp = pool.tmp_dir.display();
    let mut out = String::new();

    let _ = writeln!(out, "[{}]", pool.pool_name);
    let _ = writeln!(out, "user = {}", user);
    let _ = writeln!(out, "group = {}", user);
    let _ = writeln!(out, "listen = {}", pool.socket.display());
    let _ = writeln!(out, "listen.owner = {}", user);
    let _ = writeln!(out, "listen.group = {}", user);
    out.push_str("listen.mode = 0660\n\n");

    out.push_str("pm = ondemand\n");
    let _ = writeln!(out, "pm.max_children = {}", pool.tuning.max_children);
    let _ = writeln!(out, "pm.process_idle_timeout = {}", pool.tuning.idle_timeout);
    let _ = writeln!(out, "pm.max_requests = {}\n", pool.tuning.max_requests);

    out.push_str("chdir = /\n");
    out.push_str("clear_env = yes\n");
    out.push_str("security.limit_extensions = .php .phtml\n");
    out.push_str("request_terminate_timeout = 300s\n\n");

    let _ = writeln!(out, "php_admin_value[open_basedir] = {}", pool.open_basedir());
    let _ = writeln!(out, "php_admin_value[upload_tmp_dir] = {}/uploads", tmp);
    let _ = writeln!(out, "php_admin_value[sys_temp_dir] = {}", tmp);
    let _ = writeln!(out, "php_admin_value[session.save_path] = {}/sessions", tmp);
    let _ = writeln!(out, "php_admin_value[memory_limit] = {}", pool.php.memory_limit);
    let _ = writeln!(out, "php_admin_value[post_max_size] = {}", pool.php.post_max_size);
    let _ = writeln!(
        out,
        "php_admin_value[upload_max_filesize] = {}",
        pool.php.upload_max_filesize
    );
    let _ = writeln!(
        out,
        "php_admin_value[max_execution_time] = {}",
        pool.php.max_execution_time
    );
    let _ = writeln!(out, "php_admin_value[max_input_vars] = {}", pool.php.max_input_vars);
    out.push_str("php_admin_flag[log_errors] = on\n");
    let _ = writeln!(out, "php_admin_value[error_log] = {}", pool.error_log.display());
    out
}

pub fn render_admin_pool(layout: &Layout, max_children: u32) -> String {
    let socket = layout.admin_socket();
    let tmp = layout.admin_tmp_dir();
    let root = layout.phpmyadmin_dir();
    let log = admin_error_log(layout);

    format!(
        "[fastcp-phpmyadmin]
user = {user}
group = {user}
listen = {socket}
listen.owner = {user}
listen.group = {user}
listen.mode = 0660

pm = ondemand
pm.max_children = {max_children}
pm.process_idle_timeout = 10s
pm.max_requests = 700

chdir = /
clear_env = yes
security.limit_extensions = .php .phtml
request_terminate_timeout = 180s

php_admin_value[open_basedir] = {root}:{tmp}:/tmp:/usr/share/php
php_admin_value[upload_tmp_dir] = {tmp}
php_admin_value[sys_temp_dir] = {tmp}
php_admin_value[session.save_path] = {tmp}
php_admin_flag[log_errors] = on
php_admin_value[error_log] = {log}
",
        user = ADMIN_POOL_USER,
        socket = socket.display(),
        root = root.display(),
        tmp = tmp.display(),
        log = log.display(),
    )
}

pub fn admin_error_log(layout: &Layout) -> std::path::PathBuf {
    layout.log_dir.join("phpmyadmin-error.log")
}

#[cfg(test)]
mod tests;
