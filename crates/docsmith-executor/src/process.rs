//! Child-process command runner.

use async_trait::async_trait;
use docsmith_core::executor::{CommandOutput, CommandRunner, CommandSpec};
use docsmith_core::{Error, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands as local child processes with a hard timeout.
pub struct LocalCommandRunner {
    default_timeout: Duration,
}

impl LocalCommandRunner {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

#[async_trait]
impl CommandRunner for LocalCommandRunner {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child is killed if the timeout below drops the future.
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let timeout = spec.timeout.unwrap_or(self.default_timeout);
        debug!(command = %spec.display(), ?timeout, "Running command");

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::Internal(format!(
                    "failed to start `{}`: {}",
                    spec.display(),
                    e
                )));
            }
            Err(_) => {
                warn!(command = %spec.display(), ?timeout, "Command timed out");
                return Err(Error::Timeout(format!(
                    "`{}` did not finish within {}s",
                    spec.display(),
                    timeout.as_secs()
                )));
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
