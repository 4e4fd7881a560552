use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use super::{CommandExecutor, CommandRequest, CommandResult};
use crate::models::error::VpnError;

/// Executor that spawns processes on this machine
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Get the PATH environment variable with common binary locations.
    /// GUI launches often inherit a minimal PATH without `sudo` or the tunnel client.
    fn get_path_env() -> String {
        let base_path = std::env::var("PATH").unwrap_or_default();

        if cfg!(target_os = "windows") {
            let additional_paths = vec![r"C:\Program Files\Tailscale"];
            format!("{};{}", additional_paths.join(";"), base_path)
        } else if cfg!(target_os = "macos") {
            let additional_paths = vec![
                "/opt/homebrew/bin",
                "/usr/local/bin",
                "/Applications/Tailscale.app/Contents/MacOS",
                "/usr/bin",
                "/bin",
                "/usr/sbin",
                "/sbin",
            ];
            format!("{}:{}", additional_paths.join(":"), base_path)
        } else {
            let additional_paths = vec![
                "/usr/local/bin",
                "/usr/bin",
                "/bin",
                "/usr/sbin",
                "/sbin",
            ];
            format!("{}:{}", additional_paths.join(":"), base_path)
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for LocalExecutor {
    async fn run(&self, request: &CommandRequest) -> Result<CommandResult, VpnError> {
        let start = Instant::now();

        let output = Command::new(&request.program)
            .args(&request.args)
            .env("PATH", Self::get_path_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VpnError::CommandFailed {
                command: request.display(),
                exit_code: -1,
                stderr: e.to_string(),
            })?;

        let execution_time_ms = start.elapsed().as_millis() as u64;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            execution_time_ms,
        })
    }
}
