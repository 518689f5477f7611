//! MySQL server tuning through a managed `conf.d` fragment.

use std::sync::Arc;

use fastcp_protocol::payload::MysqlConfig;
use serde_json::Value;
use tracing::{debug, info};

use super::database::connect;
use super::{ok, params, to_value};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::files::{ensure_dir, write_atomic};
use crate::lifecycle::ProcessController;

/// Unit names tried, in order, when restarting the database server.
const SERVICE_NAMES: [&str; 3] = ["mysql", "mysqld", "mariadb"];

pub(crate) const DEFAULT_BUFFER_POOL_MB: i64 = 128;
pub(crate) const DEFAULT_MAX_CONNECTIONS: i64 = 30;

/// Values in the managed fragment, defaults for anything absent.
pub(crate) fn parse_tuning(text: &str) -> MysqlConfig {
    let mut cfg = MysqlConfig {
        buffer_pool_mb: DEFAULT_BUFFER_POOL_MB,
        max_connections: DEFAULT_MAX_CONNECTIONS,
        perf_schema: false,
        detected_ram_mb: 0,
    };
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "innodb_buffer_pool_size" => {
                if let Ok(mb) = value.trim_end_matches(['M', 'm']).parse::<i64>()
                    && mb > 0
                {
                    cfg.buffer_pool_mb = mb;
                }
            }
            "max_connections" => {
                if let Ok(n) = value.parse() {
                    cfg.max_connections = n;
                }
            }
            "performance_schema" => cfg.perf_schema = value.eq_ignore_ascii_case("ON"),
            _ => {}
        }
    }
    cfg
}

pub(crate) fn render_tuning(header: &str, buffer_pool_mb: i64, max_connections: i64, perf_schema: bool) -> String {
    format!(
        "[mysqld]\n\
         {header}\n\
         innodb_buffer_pool_size = {buffer_pool_mb}M\n\
         innodb_log_file_size = 16M\n\
         innodb_log_buffer_size = 8M\n\
         innodb_flush_log_at_trx_commit = 2\n\
         innodb_flush_method = O_DIRECT\n\
         key_buffer_size = 4M\n\
         max_connections = {max_connections}\n\
         table_open_cache = 200\n\
         thread_cache_size = 8\n\
         performance_schema = {perf}\n\
         skip-name-resolve\n",
        perf = if perf_schema { "ON" } else { "OFF" },
    )
}

pub(crate) fn validate(cfg: &MysqlConfig) -> Result<()> {
    if !(16..=16384).contains(&cfg.buffer_pool_mb) {
        return Err(AgentError::Validation(
            "buffer_pool_mb must be between 16 and 16384".into(),
        ));
    }
    if !(5..=5000).contains(&cfg.max_connections) {
        return Err(AgentError::Validation(
            "max_connections must be between 5 and 5000".into(),
        ));
    }
    Ok(())
}

/// Restart the database server under whichever name it is installed as.
pub(crate) async fn restart_mysql(controller: &dyn ProcessController) -> Result<()> {
    let mut last = None;
    if controller.has_service_manager().await {
        for name in SERVICE_NAMES {
            match controller.reload_or_restart_unit(name).await {
                Ok(()) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
    }
    for name in SERVICE_NAMES {
        match Cmd::new("service").args([name, "restart"]).run().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!("service {} restart failed: {}", name, e);
                if last.is_none() {
                    last = Some(e);
                }
            }
        }
    }
    Err(last.unwrap_or_else(|| {
        AgentError::Operation("failed to restart mysql service using known service names".into())
    }))
}

async fn apply_runtime(ctx: &AgentContext, max_connections: i64) -> Result<()> {
    let pool = connect(ctx).await?;
    let set = format!("SET GLOBAL max_connections = {}", max_connections);
    let applied = sqlx::raw_sql(&set).execute(&pool).await;
    let current = match applied {
        Ok(_) => sqlx::query_scalar::<_, u64>("SELECT @@GLOBAL.max_connections")
            .fetch_one(&pool)
            .await
            .map_err(|e| AgentError::mysql("read back max_connections failed", e)),
        Err(e) => Err(AgentError::mysql("set max_connections failed", e)),
    };
    pool.close().await;
    let current = current?;
    if current as i64 != max_connections {
        return Err(AgentError::Operation(format!(
            "max_connections mismatch after apply: expected {}, got {}",
            max_connections, current
        )));
    }
    Ok(())
}

pub async fn get_config(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    let text = std::fs::read_to_string(ctx.layout.mysql_tuning_file()).unwrap_or_default();
    let mut cfg = parse_tuning(&text);
    cfg.detected_ram_mb = ctx.ram_mb() as i64;
    to_value(&cfg)
}

pub async fn set_config(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let cfg: MysqlConfig = params(&raw)?;
    validate(&cfg)?;

    let path = ctx.layout.mysql_tuning_file();
    ensure_dir(&ctx.layout.mysql_conf_dir, 0o755)?;
    let text = render_tuning(
        "# FastCP MySQL tuning",
        cfg.buffer_pool_mb,
        cfg.max_connections,
        cfg.perf_schema,
    );
    write_atomic(&path, text.as_bytes(), 0o644).map_err(|e| e.context("failed to write config"))?;

    restart_mysql(ctx.controller.as_ref())
        .await
        .map_err(|e| e.context("failed to restart MySQL"))?;
    apply_runtime(&ctx, cfg.max_connections)
        .await
        .map_err(|e| e.context("failed to apply MySQL runtime config"))?;

    info!(
        "Updated MySQL config: buffer_pool={}M max_connections={} performance_schema={}",
        cfg.buffer_pool_mb, cfg.max_connections, cfg.perf_schema
    );
    Ok(ok())
}
