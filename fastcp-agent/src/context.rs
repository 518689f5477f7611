//! State shared by every RPC handler.

use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::Result;
use crate::layout::Layout;
use crate::lifecycle::ProcessController;
use crate::reconcile::{ReconcileHandle, ReconcileReport};
use crate::store::SiteStore;
use crate::tuning::detect_ram_mb;

pub struct AgentContext {
    pub layout: Layout,
    pub store: Arc<dyn SiteStore>,
    pub controller: Arc<dyn ProcessController>,
    pub reconcile: ReconcileHandle,
    /// Local MySQL server socket used for account and database management
    pub mysql_socket: PathBuf,
}

impl AgentContext {
    /// Run a reconciliation pass through the shared queue.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconcile.run().await
    }

    pub fn ram_mb(&self) -> u64 {
        detect_ram_mb(&self.layout.meminfo)
    }
}
