use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::BackendError;
use crate::Result;

/// Podman and docker both exit 125 when the container itself is unusable.
const RUNTIME_FAILURE_EXIT: i32 = 125;
const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Executes one command inside the container.
///
/// A non-zero exit is returned as output, not an error; only "could not
/// reach the container at all" is an error.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &[String], env: &[(&str, &str)]) -> Result<CommandOutput>;
}

/// Runs commands through `<runtime> exec <container>`.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    runtime: String,
    container: String,
    timeout: Duration,
}

impl ContainerRunner {
    pub fn new(runtime: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            container: container.into(),
            timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn command(&self, args: &[String], env: &[(&str, &str)]) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.arg("exec");
        for (key, value) in env {
            cmd.arg("--env").arg(format!("{key}={value}"));
        }
        cmd.arg(&self.container)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for ContainerRunner {
    async fn run(&self, args: &[String], env: &[(&str, &str)]) -> Result<CommandOutput> {
        debug!(runtime = %self.runtime, container = %self.container, ?args, "container exec");
        let output = tokio::time::timeout(self.timeout, self.command(args, env).output())
            .await
            .map_err(|_| {
                BackendError::Unavailable(format!(
                    "{} exec timed out after {}s",
                    self.runtime,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| BackendError::Unavailable(format!("failed to run {}: {}", self.runtime, e)))?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            code: output.status.code().unwrap_or(-1),
        };
        if result.code == RUNTIME_FAILURE_EXIT {
            return Err(BackendError::Unavailable(format!(
                "container '{}': {}",
                self.container, result.stderr
            )));
        }
        Ok(result)
    }
}
