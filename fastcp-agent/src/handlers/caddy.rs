//! `caddy.reload` and the proxy profile settings.

use std::sync::Arc;

use fastcp_protocol::payload::CaddyConfig;
use serde_json::{Value, json};
use tracing::info;

use super::{ok, params, to_value};
use crate::context::AgentContext;
use crate::errors::Result;
use crate::reconcile::ReconcileReport;
use crate::settings::{load_caddy_settings, save_caddy_settings};
use crate::tuning::normalize_caddy_config;

/// The pass summary plus the `status`/`action` pair older callers read.
pub(super) fn reload_result(report: &ReconcileReport) -> Result<Value> {
    let mut value = to_value(&report.summary())?;
    if let Value::Object(map) = &mut value {
        map.insert("status".into(), json!("ok"));
        map.insert("action".into(), json!(report.proxy_action.to_string()));
    }
    Ok(value)
}

pub async fn reload(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    info!("Regenerating and reloading the proxy configuration");
    let report = ctx.reconcile().await?;
    reload_result(&report)
}

pub async fn get_config(ctx: Arc<AgentContext>, _raw: Value) -> Result<Value> {
    to_value(&load_caddy_settings(&ctx.layout, ctx.ram_mb()))
}

pub async fn set_config(ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: CaddyConfig = params(&raw)?;
    let cfg = normalize_caddy_config(&req, ctx.ram_mb())?;
    save_caddy_settings(&ctx.layout, &cfg)?;
    ctx.reconcile().await?;
    info!(
        "Updated proxy settings: profile={} expert_mode={} access_logs={}",
        cfg.profile, cfg.expert_mode, cfg.access_logs
    );
    Ok(ok())
}
