//! Single-worker queue in front of the engine.
//!
//! Every regeneration trigger goes through a [`ReconcileHandle`], so two
//! passes never interleave their writes. Each pass runs in its own task and
//! is awaited before the next command is taken; a panicking pass fails only
//! its own caller.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::{Engine, ReconcileReport};
use crate::errors::{AgentError, Result};

enum ReconcileCommand {
    Run {
        reply: oneshot::Sender<Result<ReconcileReport>>,
    },
}

/// Cheap to clone; all clones feed the same actor.
#[derive(Clone)]
pub struct ReconcileHandle {
    tx: mpsc::Sender<ReconcileCommand>,
}

impl ReconcileHandle {
    /// Queue a pass and wait for its result.
    pub async fn run(&self) -> Result<ReconcileReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ReconcileCommand::Run { reply: reply_tx })
            .await
            .map_err(|_| AgentError::Internal("Reconcile actor closed".into()))?;
        reply_rx
            .await
            .map_err(|_| AgentError::Internal("Reconcile actor dropped response".into()))?
    }
}

pub struct ReconcileActor {
    engine: Arc<Engine>,
    rx: mpsc::Receiver<ReconcileCommand>,
}

impl ReconcileActor {
    /// Spawn the actor on the current runtime. It stops once every handle is dropped.
    pub fn spawn(engine: Engine) -> ReconcileHandle {
        let (tx, rx) = mpsc::channel(32);
        let actor = ReconcileActor {
            engine: Arc::new(engine),
            rx,
        };
        tokio::spawn(actor.run());
        ReconcileHandle { tx }
    }

    async fn run(mut self) {
        info!("Reconcile actor started");
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                ReconcileCommand::Run { reply } => {
                    let result = self.pass().await;
                    if reply.send(result).is_err() {
                        debug!("Reconcile caller went away before the pass finished");
                    }
                }
            }
        }
        debug!("Reconcile actor stopped");
    }

    async fn pass(&self) -> Result<ReconcileReport> {
        let engine = self.engine.clone();
        match tokio::spawn(async move { engine.run_pass().await }).await {
            Ok(result) => result,
            Err(e) => {
                error!("Reconcile pass aborted: {}", e);
                Err(AgentError::Internal(format!("Reconcile pass aborted: {}", e)))
            }
        }
    }
}
