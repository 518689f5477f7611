use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use fastcp_agent::config::{AgentConfig, Args, dev_mode_from_env};
use fastcp_agent::context::AgentContext;
use fastcp_agent::dispatch::Dispatcher;
use fastcp_agent::lifecycle::SystemController;
use fastcp_agent::migrate::run_startup_migrations;
use fastcp_agent::reconcile::{Engine, ReconcileActor};
use fastcp_agent::store::SqliteStore;
use fastcp_protocol::protocol::Request;
use fastcp_protocol::server::Server;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) -> Result<()> {
    let mut interrupt = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
        }
        token.cancel();
    });
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(args.log_level.into()),
        )
        .init();

    let config = AgentConfig::load(args.config.as_deref())?;
    let layout = config.paths.clone();
    let dev_mode = dev_mode_from_env();
    if dev_mode {
        warn!("Development mode: sites are served over plain HTTP");
    }
    info!("Starting FastCP agent {}", env!("CARGO_PKG_VERSION"));

    let store = Arc::new(SqliteStore::open(&layout.site_db()));
    let controller = Arc::new(SystemController::new(layout.clone()));
    let engine = Engine::new(layout.clone(), store.clone(), controller.clone())
        .with_policy(config.readiness.clone())
        .with_dev_mode(dev_mode);
    let ctx = Arc::new(AgentContext {
        reconcile: ReconcileActor::spawn(engine),
        mysql_socket: config.mysql_socket.clone(),
        layout: layout.clone(),
        store,
        controller,
    });

    if args.skip_migrations {
        info!("Skipping startup migrations");
    } else {
        run_startup_migrations(&ctx).await;
    }

    let dispatcher = Arc::new(Dispatcher::new(ctx));
    let handler = move |request: Request| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { dispatcher.handle(request).await }
    };

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone())?;

    let socket = args.socket.unwrap_or_else(|| layout.agent_socket());
    let mut server = Server::new(socket, handler).with_shutdown(shutdown);
    if let Some(group) = args.socket_group {
        server = server.with_socket_group(group);
    }
    server.run().await?;

    info!("FastCP agent stopped");
    Ok(())
}
