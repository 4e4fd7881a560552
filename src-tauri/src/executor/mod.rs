pub mod local;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::error::VpnError;

/// A single external process invocation. Arguments are passed to the process
/// as-is; nothing is ever handed to a shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandRequest {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// Build a request from a command line typed by the user.
    pub fn parse(command_line: &str) -> Result<Self, VpnError> {
        let mut words = split_command_line(command_line)?.into_iter();
        let program = words
            .next()
            .ok_or_else(|| VpnError::InvalidArgument("empty command line".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }

    /// Display form used in logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Display form with the values at the given argument positions masked
    pub fn redacted(&self, secret_positions: &[usize]) -> String {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().enumerate().map(|(i, a)| {
                if secret_positions.contains(&i) {
                    "[REDACTED]".to_string()
                } else {
                    a.clone()
                }
            }))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Split a command line into words with POSIX quoting rules.
/// Operators such as `|` or `;` are plain characters, there is no shell.
pub fn split_command_line(input: &str) -> Result<Vec<String>, VpnError> {
    shlex::split(input).ok_or_else(|| {
        VpnError::InvalidArgument("unterminated quote or trailing backslash".to_string())
    })
}

/// Result of executing a command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub execution_time_ms: u64,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs external processes in the privileged context
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the process to completion. A non-zero exit is still `Ok`;
    /// only a spawn failure is an error.
    async fn run(&self, request: &CommandRequest) -> Result<CommandResult, VpnError>;

    /// Run the process and return its stdout, failing on a non-zero exit.
    async fn execute(&self, request: &CommandRequest) -> Result<String, VpnError> {
        let result = self.run(request).await?;
        if result.success() {
            Ok(result.stdout)
        } else {
            let stderr = if result.stderr.trim().is_empty() {
                format!("process exited with code {}", result.exit_code)
            } else {
                result.stderr
            };
            Err(VpnError::CommandFailed {
                command: request.display(),
                exit_code: result.exit_code,
                stderr,
            })
        }
    }
}
