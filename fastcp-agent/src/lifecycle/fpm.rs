//! Applying written pool files for one PHP version.
//!
//! Per version: reload, poll against the short deadline, force a restart
//! once, poll against the long deadline, then give up naming every socket
//! that never came up.

use std::path::PathBuf;

use tracing::{info, warn};

use super::controller::ProcessController;
use super::readiness::{ReadinessPolicy, unready_sockets, wait_for_sockets};
use crate::errors::{AgentError, Result};
use crate::layout::Layout;
use crate::outcome::StepOutcome;
use crate::php::resolve_fpm_unit;

/// How a version's FPM master is driven.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FpmControl {
    Unit(String),
    Direct,
}

impl FpmControl {
    pub async fn resolve(
        controller: &dyn ProcessController,
        layout: &Layout,
        version: &str,
        warnings: &mut Vec<String>,
    ) -> Self {
        if !controller.has_service_manager().await {
            return FpmControl::Direct;
        }
        match resolve_fpm_unit(layout, version) {
            Ok(unit) => FpmControl::Unit(unit),
            Err(e) => {
                StepOutcome::degraded(format!(
                    "php {} service resolution failed, using direct control: {}",
                    version, e
                ))
                .record(warnings);
                FpmControl::Direct
            }
        }
    }
}

/// Reload `version` and block until every socket in `sockets` is ready.
///
/// Non-fatal problems along the way (a failed reload that the restart then
/// fixes) are appended to `warnings`.
pub async fn apply_version(
    controller: &dyn ProcessController,
    layout: &Layout,
    policy: &ReadinessPolicy,
    version: &str,
    sockets: &[PathBuf],
    warnings: &mut Vec<String>,
) -> Result<()> {
    let control = FpmControl::resolve(controller, layout, version, warnings).await;

    match &control {
        FpmControl::Unit(unit) => {
            StepOutcome::from_result(&format!("enable {}", unit), controller.enable_unit(unit).await)
                .log();
            StepOutcome::from_result(
                &format!("reload {}", unit),
                controller.reload_or_restart_unit(unit).await,
            )
            .record(warnings);
        }
        FpmControl::Direct => {
            StepOutcome::from_result(
                &format!("reload php-fpm {}", version),
                controller.fpm_reload_direct(version).await,
            )
            .record(warnings);
        }
    }

    if wait_for_sockets(controller, sockets, policy.short, policy).await {
        return Ok(());
    }

    info!("php {} sockets not ready after reload; forcing restart", version);
    let restarted = match &control {
        FpmControl::Unit(unit) => controller.restart_unit(unit).await,
        FpmControl::Direct => controller.fpm_restart_direct(version).await,
    };
    StepOutcome::from_result(&format!("restart php-fpm {}", version), restarted).record(warnings);

    if wait_for_sockets(controller, sockets, policy.long, policy).await {
        return Ok(());
    }

    let unready = unready_sockets(controller, sockets, policy.dial).await;
    if unready.is_empty() {
        return Ok(());
    }
    warn!("php {} sockets never became ready: {}", version, unready.join("; "));
    Err(AgentError::SocketsNotReady {
        version: version.to_string(),
        sockets: unready,
    })
}
