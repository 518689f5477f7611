use std::path::PathBuf;
use thiserror::Error;

/// Format a YAML error for user-friendly display, including the field path
fn format_yaml_error(e: &serde_path_to_error::Error<serde_yaml::Error>) -> String {
    let path = e.path().to_string();
    let inner = e.inner();
    let msg = inner.to_string();

    let located = if let Some(loc) = inner.location() {
        format!("Line {}, Column {}: {}", loc.line(), loc.column(), msg)
    } else {
        msg
    };

    if path.is_empty() || path == "." {
        located
    } else {
        format!("{}: {}", path, located)
    }
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file '{path}':\n  {}", format_yaml_error(.source))]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_path_to_error::Error<serde_yaml::Error>,
    },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Rejected input or desired state. The message is shown to the operator as is.
    #[error("{0}")]
    Validation(String),

    #[error("{command} failed: {status}: {output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("php {version} FPM sockets not available after restart: {}", .sockets.join("; "))]
    SocketsNotReady { version: String, sockets: Vec<String> },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read site store: {0}")]
    Store(#[from] sqlx::Error),

    #[error("{action}: {source}")]
    Mysql {
        action: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// A failed host operation that is not a single external command.
    #[error("{0}")]
    Operation(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AgentError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn mysql(action: impl Into<String>, source: sqlx::Error) -> Self {
        AgentError::Mysql {
            action: action.into(),
            source,
        }
    }

    /// Prefix the error with what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        AgentError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
