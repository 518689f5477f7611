use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message exceeds maximum size of {max} bytes")]
    MessageTooLarge { max: usize },

    #[error("connection closed mid-message")]
    UnexpectedEof,

    #[error("failed to read message: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to agent at {socket_path}: {source}")]
    Connect {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send request {method}: {source}")]
    Send {
        method: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read response for {method}: {source}")]
    Receive {
        method: String,
        #[source]
        source: ProtocolError,
    },

    #[error("agent closed the connection before answering {method}")]
    Disconnected { method: String },

    #[error("{method} timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("response id {got} does not match request id {expected}")]
    IdMismatch { expected: String, got: String },

    #[error("agent error: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create socket directory {path}: {source}")]
    SocketDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("socket path {socket_path} is a symlink")]
    SocketSymlink { socket_path: PathBuf },

    #[error("stale socket found at {socket_path} cannot be deleted: {source}")]
    StaleSocket {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot bind unix socket at {socket_path}: {source}")]
    Bind {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to set socket permissions at {socket_path}: {source}")]
    SocketPermissions {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to change socket group at {socket_path}: {source}")]
    SocketOwnership {
        socket_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("group resolution failed: {0}")]
    GroupResolution(String),

    #[error("failed to send response: {0}")]
    Send(#[source] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
