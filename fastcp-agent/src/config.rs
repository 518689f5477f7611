//! Agent startup configuration: command line flags and the optional YAML file.

use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, Result};
use crate::layout::Layout;
use crate::lifecycle::ReadinessPolicy;

/// Environment variable that switches the agent into development mode.
pub const DEV_MODE_ENV: &str = "FASTCP_DEV";

fn default_mysql_socket() -> PathBuf {
    PathBuf::from("/var/run/mysqld/mysqld.sock")
}

/// FastCP host agent
#[derive(Parser, Debug, Clone)]
#[command(name = "fastcp-agent", version, about = "FastCP privileged host agent")]
pub struct Args {
    /// RPC socket path (defaults to <fastcp_root>/run/agent.sock)
    #[arg(long, env = "FASTCP_AGENT_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Group allowed to connect to the RPC socket
    #[arg(long, env = "FASTCP_AGENT_SOCKET_GROUP")]
    pub socket_group: Option<String>,

    /// YAML config file
    #[arg(long, env = "FASTCP_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence
    #[arg(long, env = "FASTCP_AGENT_LOG_LEVEL", default_value = "info")]
    pub log_level: tracing::Level,

    /// Skip the startup migration steps
    #[arg(long, env = "FASTCP_AGENT_SKIP_MIGRATIONS")]
    pub skip_migrations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub readiness: ReadinessPolicy,
    pub paths: Layout,
    pub mysql_socket: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            readiness: ReadinessPolicy::default(),
            paths: Layout::default(),
            mysql_socket: default_mysql_socket(),
        }
    }
}

impl AgentConfig {
    /// Defaults when `path` is `None`, otherwise the file's settings over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("failed to read config '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&contents, path)
    }

    /// Parse YAML text; `path` is only used in error messages.
    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let de = serde_yaml::Deserializer::from_str(contents);
        let config: Self = serde_path_to_error::deserialize(de).map_err(|e| AgentError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let r = &self.readiness;
        if r.interval.is_zero() || r.dial.is_zero() {
            return Err(AgentError::Config(
                "readiness interval and dial must be greater than zero".into(),
            ));
        }
        if r.short.is_zero() || r.long.is_zero() {
            return Err(AgentError::Config(
                "readiness short and long waits must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Whether `FASTCP_DEV` asks for development mode.
pub fn dev_mode_from_env() -> bool {
    std::env::var(DEV_MODE_ENV).is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
