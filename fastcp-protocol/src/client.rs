use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        UnixStream,
        unix::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::debug;

use crate::{
    errors::{ClientError, ProtocolError},
    protocol::{Request, Response, decode_response, encode_line, read_line},
};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Deadline for establishing the socket connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Deadline for routine calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-side deadline for a method. Long-running host operations get
/// more headroom than routine calls.
pub fn timeout_for(method: &str) -> Duration {
    match method {
        "caddy.reload" => Duration::from_secs(2 * 60),
        "system.installPhpVersion" => Duration::from_secs(90 * 60),
        "system.installRclone" => Duration::from_secs(20 * 60),
        "system.installFirewall" => Duration::from_secs(10 * 60),
        "system.update" => Duration::from_secs(30 * 60),
        "site.installWordPress" => Duration::from_secs(10 * 60),
        "site.createDirectory" | "site.deleteDirectory" => Duration::from_secs(2 * 60),
        "user.create" | "user.delete" | "user.updateLimits" => Duration::from_secs(2 * 60),
        "system.setCaddyConfig" | "system.setMysqlConfig" | "system.setSshConfig" => {
            Duration::from_secs(2 * 60)
        }
        _ => DEFAULT_CALL_TIMEOUT,
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    format!("{}-{}", std::process::id(), NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Sequential client: one request in flight per connection, matching the
/// server's per-connection ordering.
pub struct Client {
    socket_path: PathBuf,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: Vec<u8>,
}

impl Client {
    /// Connect to the agent at the given socket path
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let connect = UnixStream::connect(socket_path);
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                return Err(ClientError::Connect {
                    socket_path: socket_path.to_path_buf(),
                    source: e,
                });
            }
            Err(_) => {
                return Err(ClientError::Connect {
                    socket_path: socket_path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            reader: BufReader::new(read_half),
            writer: write_half,
            line: Vec::new(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send a request and wait for its response using the method's default deadline.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, timeout_for(method)).await
    }

    /// Send a request and wait at most `timeout` for the response.
    ///
    /// A remote error is returned as [`ClientError::Remote`] with the
    /// agent's message unchanged.
    pub async fn call_with_timeout(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let response = match tokio::time::timeout(timeout, self.send_request(method, params)).await {
            Ok(r) => r?,
            Err(_) => {
                return Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };
        response.into_result().map_err(ClientError::Remote)
    }

    /// Typed variant of [`Client::call`].
    pub async fn call_typed<P, R>(&mut self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params).map_err(ProtocolError::Encode)?;
        let value = self.call(method, params).await?;
        serde_json::from_value(value).map_err(|e| ProtocolError::Decode(e).into())
    }

    async fn send_request(&mut self, method: &str, params: Value) -> Result<Response> {
        let request = Request::new(next_request_id(), method, params);
        let bytes = encode_line(&request)?;
        debug!("Sending request id={} method={}", request.id, method);

        self.writer
            .write_all(&bytes)
            .await
            .map_err(|e| ClientError::Send {
                method: method.to_string(),
                source: e,
            })?;

        let more = read_line(&mut self.reader, &mut self.line)
            .await
            .map_err(|e| ClientError::Receive {
                method: method.to_string(),
                source: e,
            })?;
        if !more {
            return Err(ClientError::Disconnected {
                method: method.to_string(),
            });
        }
        let response = decode_response(&self.line)?;
        if response.id != request.id {
            return Err(ClientError::IdMismatch {
                expected: request.id,
                got: response.id,
            });
        }
        Ok(response)
    }
}

/// One-off call on a dedicated connection, for long operations that should
/// not hold up a shared client.
pub async fn call_isolated(socket_path: &Path, method: &str, params: Value) -> Result<Value> {
    let mut client = Client::connect(socket_path).await?;
    client.call(method, params).await
}
