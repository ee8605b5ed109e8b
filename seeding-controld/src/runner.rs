use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use async_trait::async_trait;
use tokio::process::Command;
use shared::protocol::NO_OUTPUT;

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to launch `{command}`: {error}")]
    Spawn { command: String, error: std::io::Error },
    #[error("`{command}` timed out after {after:?}")]
    Timeout { command: String, after: Duration },
    #[error("`{command}` failed: {cause}")]
    Failed { command: String, cause: String },
}

/// A command line to execute, without going through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), cwd: None }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Operator-facing text: stdout if it says anything, else stderr, else
    /// the no-output sentinel. Always trimmed.
    pub fn text(&self) -> &str {
        [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or(NO_OUTPUT)
    }

    fn is_blank(&self) -> bool {
        self.stdout.trim().is_empty() && self.stderr.trim().is_empty()
    }
}

/// Executes external commands. Implementations never retry.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Non-zero exit with output is returned as `Ok` so callers can surface
    /// the text; only launch failures, timeouts and silent failures are `Err`.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecutionError>;
}

/// Runs commands as tokio child processes with a per-call deadline.
pub struct TokioRunner {
    timeout: Duration,
}

impl TokioRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, ExecutionError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // the child dies with its future: timeout, task abort or shutdown
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        tracing::debug!("Running {}", invocation);

        let child = command.spawn().map_err(|error| ExecutionError::Spawn {
            command: invocation.to_string(),
            error,
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ExecutionError::Failed {
                command: invocation.to_string(),
                cause: e.to_string(),
            })?,
            Err(_) => {
                return Err(ExecutionError::Timeout {
                    command: invocation.to_string(),
                    after: self.timeout,
                })
            }
        };

        let captured = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if !output.status.success() && captured.is_blank() {
            return Err(ExecutionError::Failed {
                command: invocation.to_string(),
                cause: output.status.to_string(),
            });
        }

        Ok(captured)
    }
}
