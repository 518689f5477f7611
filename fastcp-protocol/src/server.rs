#[cfg(not(unix))]
compile_error!("fastcp-protocol server requires a unix target");

use std::{
    future::Future,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    errors::ServerError,
    protocol::{Request, Response, decode_request, encode_line, read_line},
};

pub type Result<T> = std::result::Result<T, ServerError>;

/// First delay after a failed `accept`.
pub const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(50);
/// Upper bound for the accept backoff.
pub const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Next accept-failure delay: 50ms, doubling, capped at 5s.
pub fn next_accept_backoff(current: Option<Duration>) -> Duration {
    match current {
        None => ACCEPT_BACKOFF_START,
        Some(d) => (d * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

/// Resolve the GID of the group allowed to talk to the agent.
fn resolve_group_gid(name: &str) -> Result<nix::unistd::Gid> {
    nix::unistd::Group::from_name(name)
        .map_err(|e| ServerError::GroupResolution(format!("failed to look up group {}: {}", name, e)))?
        .map(|g| g.gid)
        .ok_or_else(|| ServerError::GroupResolution(format!("group {} does not exist", name)))
}

pub struct Server<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    socket_path: PathBuf,
    socket_group: Option<String>,
    handler: Arc<F>,
    shutdown: CancellationToken,
}

impl<F, Fut> Server<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    pub fn new(socket_path: PathBuf, handler: F) -> Self {
        Self {
            socket_path,
            socket_group: None,
            handler: Arc::new(handler),
            shutdown: CancellationToken::new(),
        }
    }

    /// Hand the socket to `group` after binding so its members can connect.
    pub fn with_socket_group(mut self, group: impl Into<String>) -> Self {
        self.socket_group = Some(group.into());
        self
    }

    /// Use an externally owned shutdown token.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Recreate the listening socket: any stale file at the path is removed
    /// first, then permissions are relaxed to owner+group.
    pub fn bind(&self) -> Result<UnixListener> {
        if let Some(parent) = self.socket_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ServerError::SocketDir {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        // Reject symlinked socket path before any operations
        if let Ok(meta) = std::fs::symlink_metadata(&self.socket_path)
            && meta.file_type().is_symlink()
        {
            return Err(ServerError::SocketSymlink {
                socket_path: self.socket_path.clone(),
            });
        }

        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("Removed stale socket {}", self.socket_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ServerError::StaleSocket {
                    socket_path: self.socket_path.clone(),
                    source: e,
                });
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| ServerError::Bind {
            socket_path: self.socket_path.clone(),
            source: e,
        })?;

        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))
            .map_err(|e| ServerError::SocketPermissions {
                socket_path: self.socket_path.clone(),
                source: e,
            })?;

        if let Some(group) = &self.socket_group {
            let gid = resolve_group_gid(group)?;
            nix::unistd::chown(&self.socket_path, None, Some(gid)).map_err(|e| {
                ServerError::SocketOwnership {
                    socket_path: self.socket_path.clone(),
                    source: e.into(),
                }
            })?;
        }

        Ok(listener)
    }

    /// Bind and serve until the shutdown token is cancelled, then wait for
    /// every in-flight connection task to finish.
    pub async fn run(self) -> Result<()> {
        let listener = self.bind()?;
        info!("Agent listening on {}", self.socket_path.display());
        self.serve(listener).await;
        Ok(())
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: UnixListener) {
        let tracker = TaskTracker::new();
        let mut backoff: Option<Duration> = None;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            backoff = None;
                            let handler = Arc::clone(&self.handler);
                            let shutdown = self.shutdown.clone();
                            tracker.spawn(async move {
                                if let Err(e) = handle_client(handler, stream, shutdown).await {
                                    debug!("Client handler error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            let delay = next_accept_backoff(backoff);
                            backoff = Some(delay);
                            error!("Failed to accept connection, retrying in {:?}: {}", delay, e);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = self.shutdown.cancelled() => break,
                            }
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }
            }
        }

        drop(listener);
        tracker.close();
        let in_flight = tracker.len();
        if in_flight > 0 {
            debug!("Waiting for {} connection(s) to finish", in_flight);
        }
        tracker.wait().await;
        info!("Server stopped");
    }
}

/// Per-connection loop: read one line, dispatch, write one line, repeat.
///
/// Requests on one connection are handled strictly in order. An idle
/// connection is dropped on shutdown; a request already being handled runs
/// to completion and gets its response.
async fn handle_client<F, Fut>(
    handler: Arc<F>,
    stream: UnixStream,
    shutdown: CancellationToken,
) -> Result<()>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    if let Ok(cred) = stream.peer_cred() {
        debug!("Client connected (uid={}, gid={})", cred.uid(), cred.gid());
    }

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();

    loop {
        let more = tokio::select! {
            r = read_line(&mut reader, &mut line) => r?,
            _ = shutdown.cancelled() => {
                debug!("Closing idle connection on shutdown");
                return Ok(());
            }
        };
        if !more {
            debug!("Client disconnected (EOF)");
            return Ok(());
        }

        let request = match decode_request(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to decode request, closing connection: {}", e);
                return Err(e.into());
            }
        };
        debug!("Received request id={} method={}", request.id, request.method);

        let response = handler(request).await;
        let bytes = match encode_line(&response) {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to encode response id={}: {}", response.id, e);
                encode_line(&Response::error(
                    response.id.clone(),
                    format!("failed to encode response: {}", e),
                ))?
            }
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            error!("Failed to send response: {}", e);
            return Err(ServerError::Send(e));
        }
    }
}

#[cfg(test)]
mod tests;
