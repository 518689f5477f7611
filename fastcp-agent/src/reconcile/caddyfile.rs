//! Caddyfile rendering.
//!
//! The whole file is rebuilt from the snapshot on every pass. Sites appear
//! in id order and each site's domains in store order (primary first), so the
//! same state always renders the same bytes.

use std::fmt::Write;
use std::path::Path;

use super::plan::{PoolPlan, is_disallowed_owner};
use super::snapshot::DesiredState;
use crate::layout::Layout;
use crate::model::Site;

/// Internal address the panel's admin-tool proxy forwards to.
pub const ADMIN_TOOL_ADDRESS: &str = "http://127.0.0.1:2088";

pub fn render_caddyfile(state: &DesiredState, plan: &PoolPlan, layout: &Layout) -> String {
    let mut out = String::new();
    write_preamble(&mut out, state);
    write_admin_tool(&mut out, layout);

    for site in &state.sites {
        if is_disallowed_owner(&site.username) {
            continue;
        }
        let Some(socket) = plan.socket_for(&site.id) else {
            continue;
        };
        write_site(&mut out, state, layout, site, socket);
    }

    out.push_str("# Default fallback for unconfigured domains\n");
    out.push_str(":80, :443 {\n");
    out.push_str("    respond \"FastCP - No site configured for this domain\" 404\n");
    out.push_str("}\n");
    out
}

fn write_preamble(out: &mut String, state: &DesiredState) {
    let p = &state.proxy;
    out.push_str("# FastCP Main Caddyfile\n");
    out.push_str("# DO NOT EDIT - This file is auto-generated by FastCP\n\n");
    out.push_str("{\n");
    out.push_str("    admin localhost:2019\n");
    let _ = writeln!(out, "    grace_period {}", p.grace_period);
    out.push_str("    log {\n        level ERROR\n    }\n");
    out.push_str("    servers {\n");
    out.push_str("        timeouts {\n");
    let _ = writeln!(out, "            read_header {}", p.read_header);
    let _ = writeln!(out, "            read_body {}", p.read_body);
    let _ = writeln!(out, "            write {}", p.write_timeout);
    let _ = writeln!(out, "            idle {}", p.idle_timeout);
    out.push_str("        }\n");
    let _ = writeln!(out, "        max_header_size {}", p.max_header_size);
    out.push_str("    }\n");
    if state.dev_mode {
        out.push_str("    auto_https off\n");
    }
    out.push_str("}\n\n");
}

fn write_admin_tool(out: &mut String, layout: &Layout) {
    let _ = writeln!(out, "{} {{", ADMIN_TOOL_ADDRESS);
    let _ = writeln!(out, "    root * {}", layout.phpmyadmin_dir().display());
    let _ = writeln!(out, "    php_fastcgi unix/{}", layout.admin_socket().display());
    out.push_str("    file_server\n}\n\n");
}

fn address(domain: &str, force_https: bool, dev_mode: bool) -> String {
    if dev_mode {
        format!("http://{}", domain)
    } else if force_https {
        domain.to_string()
    } else {
        format!("http://{}, https://{}", domain, domain)
    }
}

fn redirect_scheme(force_https: bool, dev_mode: bool) -> &'static str {
    if dev_mode {
        "http"
    } else if force_https {
        "https"
    } else {
        "{scheme}"
    }
}

/// Quoted header value with CR/LF stripped, or `None` when nothing is left.
pub fn cache_control_value(raw: &str) -> Option<String> {
    let value: String = raw.trim().chars().filter(|c| *c != '\r' && *c != '\n').collect();
    (!value.is_empty()).then(|| format!("{:?}", value))
}

fn write_site(out: &mut String, state: &DesiredState, layout: &Layout, site: &Site, socket: &Path) {
    let suspended = state.is_suspended(&site.username);

    for d in &site.domains {
        let addr = address(&d.domain, site.force_https, state.dev_mode);

        if suspended {
            let _ = writeln!(out, "# Site: {} (User: {}) [SUSPENDED]", d.domain, site.username);
            let _ = writeln!(out, "{} {{", addr);
            let _ = writeln!(out, "    root * {}", layout.suspended_dir.display());
            out.push_str("    file_server\n");
            out.push_str("    try_files {path} /index.html\n");
            out.push_str("}\n\n");
            continue;
        }

        if d.redirect_to_primary && d.domain != site.primary_domain {
            let _ = writeln!(
                out,
                "# Redirect: {} -> {} (User: {})",
                d.domain, site.primary_domain, site.username
            );
            let _ = writeln!(out, "{} {{", addr);
            let _ = writeln!(
                out,
                "    redir {}://{}{{uri}} permanent",
                redirect_scheme(site.force_https, state.dev_mode),
                site.primary_domain
            );
            out.push_str("}\n\n");
            continue;
        }

        let marker = if d.is_primary { " [PRIMARY]" } else { "" };
        let _ = writeln!(out, "# Site: {} (User: {}){}", d.domain, site.username, marker);
        let _ = writeln!(out, "{} {{", addr);
        let _ = writeln!(out, "    root * {}", site.document_root.display());
        if site.compression_enabled {
            let algos: Vec<&str> = [(site.zstd_enabled, "zstd"), (site.gzip_enabled, "gzip")]
                .into_iter()
                .filter_map(|(on, name)| on.then_some(name))
                .collect();
            if !algos.is_empty() {
                let _ = writeln!(out, "    encode {}", algos.join(" "));
            }
        }
        if site.cache_control_enabled
            && let Some(value) = cache_control_value(&site.cache_control_value)
        {
            let _ = writeln!(out, "    header Cache-Control {}", value);
        }
        let _ = writeln!(out, "    php_fastcgi unix/{}", socket.display());
        out.push_str("    file_server\n");
        if state.proxy.access_logs {
            let dir = layout.site_access_log_dir(&site.username, &site.domain);
            out.push_str("\n    log {\n");
            let _ = writeln!(out, "        output file {}/access.log", dir.display());
            out.push_str("    }");
        }
        out.push_str("\n}\n\n");
    }
}
