//! Method name → handler table.
//!
//! Handlers see only the shared [`AgentContext`] and the raw params; they
//! know nothing about connections or encoding. Errors are rendered with
//! `Display` into the response verbatim.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fastcp_protocol::protocol::{Request, Response};
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::AgentContext;
use crate::errors::{AgentError, Result};
use crate::handlers;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type Handler = fn(Arc<AgentContext>, Value) -> HandlerFuture;

pub struct Dispatcher {
    ctx: Arc<AgentContext>,
    handlers: HashMap<&'static str, Handler>,
}

impl Dispatcher {
    /// A dispatcher with every agent method registered.
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        let mut dispatcher = Self::empty(ctx);
        handlers::register(&mut dispatcher);
        dispatcher
    }

    /// A dispatcher with no methods, for callers that register their own.
    pub fn empty(ctx: Arc<AgentContext>) -> Self {
        Self {
            ctx,
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, method: &'static str, handler: Handler) {
        if self.handlers.insert(method, handler).is_some() {
            warn!("Handler for {} registered twice; keeping the last one", method);
        }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| AgentError::UnknownMethod(method.to_string()))?;
        handler(self.ctx.clone(), params).await
    }

    /// Run one request to exactly one response.
    pub async fn handle(&self, request: Request) -> Response {
        debug!("Received request {} ({})", request.method, request.id);
        match self.call(&request.method, request.params).await {
            Ok(result) => Response::ok(request.id, result),
            Err(e) => {
                warn!("{} failed: {}", request.method, e);
                Response::error(request.id, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests;
