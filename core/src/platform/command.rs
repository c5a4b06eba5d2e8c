// External command execution
//
// Commands are always argv vectors handed straight to the OS; nothing is
// ever passed through a shell.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Default time budget for one external command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors for running an external command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("'{program}' could not be started: {message}")]
    Spawn { program: String, message: String },
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with `stdout`
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with `stderr`
    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Short description of a failure for logs and errors
    pub fn failure_summary(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.status {
            Some(code) => format!("exit {}: {}", code, detail),
            None => format!("terminated by signal: {}", detail),
        }
    }
}

/// Runs external programs
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Runs programs on the host, optionally through `sudo -n`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
    use_sudo: bool,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            use_sudo: false,
        }
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Prefix every command with `sudo -n` (non-interactive)
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        let mut command = if self.use_sudo {
            let mut command = Command::new("sudo");
            command.arg("-n").arg(program);
            command
        } else {
            Command::new(program)
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Arguments can carry secrets; only the program and verb are logged
        tracing::debug!(program, verb = args.first().map(String::as_str).unwrap_or(""), "Running command");

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| CommandError::Timeout {
                program: program.to_string(),
                timeout: self.timeout,
            })?
            .map_err(|e| CommandError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Build an argv vector from string slices
pub fn argv<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter().map(Into::into).collect()
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted runner for platform adapter tests

    use super::*;
    use parking_lot::Mutex;

    /// Replies are matched on the full command line (`program arg arg …`)
    /// by prefix; unmatched commands succeed with empty output.
    #[derive(Default)]
    pub struct ScriptedRunner {
        replies: Mutex<Vec<(String, Result<CommandOutput, CommandError>)>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(&self, prefix: &str, result: Result<CommandOutput, CommandError>) {
            self.replies.lock().push((prefix.to_string(), result));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
            let line = std::iter::once(program.to_string())
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(" ");
            self.calls.lock().push(line.clone());
            self.replies
                .lock()
                .iter()
                .rev()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map(|(_, result)| result.clone())
                .unwrap_or_else(|| Ok(CommandOutput::ok("")))
        }
    }
}
