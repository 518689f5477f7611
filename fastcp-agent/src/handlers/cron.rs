//! `cron.sync`: the tenant crontab is owned entirely by the panel.

use std::sync::Arc;

use fastcp_protocol::payload::{CronJob, SyncCronJobs};
use serde_json::Value;
use tracing::info;

use super::{ok, params, require_account, validate_username};
use crate::cmd::Cmd;
use crate::context::AgentContext;
use crate::errors::{AgentError, Result};

const HEADER: [&str; 3] = [
    "# FastCP managed cron jobs - DO NOT EDIT MANUALLY",
    "# Changes will be overwritten by FastCP",
    "",
];

/// Crontab text for the enabled jobs.
pub(super) fn render_crontab(jobs: &[CronJob]) -> Result<String> {
    let mut lines: Vec<String> = HEADER.iter().map(|s| s.to_string()).collect();
    for job in jobs.iter().filter(|j| j.enabled) {
        if [&job.name, &job.id, &job.expression, &job.command]
            .iter()
            .any(|f| f.contains(['\n', '\r']))
        {
            return Err(AgentError::Validation(format!(
                "cron job {} must not contain line breaks",
                job.id
            )));
        }
        lines.push(format!("# {} (ID: {})", job.name, job.id));
        lines.push(format!("{} {}", job.expression, job.command));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

pub async fn sync(_ctx: Arc<AgentContext>, raw: Value) -> Result<Value> {
    let req: SyncCronJobs = params(&raw)?;
    validate_username(&req.username)?;
    info!("Syncing {} cron jobs for {}", req.jobs.len(), req.username);
    require_account(&req.username)?;

    let content = render_crontab(&req.jobs)?;
    Cmd::new("crontab")
        .args(["-u", req.username.as_str(), "-"])
        .stdin(content)
        .run()
        .await
        .map_err(|e| e.context("failed to update crontab"))?;
    Ok(ok())
}
