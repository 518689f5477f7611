//! External command execution.
//!
//! Every host tool the agent drives (systemctl, php-fpm, ufw, apt-get, ...)
//! goes through [`Cmd`], so failures always carry the command line, the exit
//! status and the captured output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::duration::format_duration;
use crate::errors::{AgentError, Result};

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    /// stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    timeout: Option<Duration>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed `input` to the command's stdin.
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Kill the command and fail if it has not exited within `limit`.
    pub fn timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// The command line as shown in errors and logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion and capture output. Only a failure to spawn is an error.
    pub async fn output(&self) -> Result<CmdOutput> {
        debug!("Running {}", self.display());
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if self.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| AgentError::Command {
            command: self.display(),
            status: "spawn failed".to_string(),
            output: e.to_string(),
        })?;

        let stdin = child.stdin.take();
        let finished = async {
            if let Some(input) = &self.stdin
                && let Some(mut pipe) = stdin
            {
                pipe.write_all(input.as_bytes()).await.map_err(|e| {
                    AgentError::io("write stdin of", PathBuf::from(&self.program), e)
                })?;
                drop(pipe);
            }
            child
                .wait_with_output()
                .await
                .map_err(|e| AgentError::io("wait for", PathBuf::from(&self.program), e))
        };

        // Dropping the child on expiry kills it (kill_on_drop).
        let out = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, finished)
                .await
                .map_err(|_| AgentError::Command {
                    command: self.display(),
                    status: format!("timed out after {}", format_duration(&limit)),
                    output: String::new(),
                })??,
            None => finished.await?,
        };

        Ok(CmdOutput {
            success: out.status.success(),
            status: out.status.to_string(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }

    /// Run and require a zero exit status. Returns the combined output.
    pub async fn run(&self) -> Result<String> {
        let out = self.output().await?;
        if out.success {
            Ok(out.combined())
        } else {
            Err(AgentError::Command {
                command: self.display(),
                status: out.status.clone(),
                output: out.combined(),
            })
        }
    }

    /// True when the command ran and exited zero.
    pub async fn succeeds(&self) -> bool {
        matches!(self.output().await, Ok(out) if out.success)
    }

    /// stdout of a successful run.
    pub async fn stdout(&self) -> Option<String> {
        match self.output().await {
            Ok(out) if out.success => Some(out.stdout),
            _ => None,
        }
    }
}
