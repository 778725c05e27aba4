use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{GatewayError, GitError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit status and captured streams of one finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub command: String,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs one command in one working directory. Implementations never treat a
/// non-zero exit as an error; only failing to run (or finish) the command is.
#[async_trait]
pub trait CommandGateway: Send + Sync + fmt::Debug {
    async fn exec(&self, cwd: &Path, args: &[OsString]) -> Result<CommandOutput, GatewayError>;
}

/// Spawns the configured binary as a child process. The child is killed if it
/// outlives the timeout or if the calling future is dropped.
#[derive(Debug, Clone)]
pub struct ProcessGateway {
    binary: PathBuf,
    timeout: Duration,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessGateway {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            envs: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl CommandGateway for ProcessGateway {
    async fn exec(&self, cwd: &Path, args: &[OsString]) -> Result<CommandOutput, GatewayError> {
        let rendered = render_command(&self.binary, args);
        debug!(command = %rendered, cwd = %cwd.display(), "running command");

        let mut command = Command::new(&self.binary);
        command
            .current_dir(cwd)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(|source| GatewayError::Io {
                command: rendered.clone(),
                source,
            })?,
            Err(_) => {
                return Err(GatewayError::Timeout {
                    command: rendered,
                    after: self.timeout,
                })
            }
        };

        let stdout =
            String::from_utf8(output.stdout).map_err(|source| GatewayError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stdout",
                source,
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|source| GatewayError::NonUtf8Output {
                command: rendered.clone(),
                stream: "stderr",
                source,
            })?;

        Ok(CommandOutput {
            command: rendered,
            status: output.status.code(),
            stdout,
            stderr,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct GitCli {
    gateway: Arc<dyn CommandGateway>,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new("git", DEFAULT_TIMEOUT)
    }
}

impl GitCli {
    /// Git with prompts disabled and a fixed locale so output can be matched.
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        let gateway = ProcessGateway::new(binary, timeout)
            .with_env("GIT_TERMINAL_PROMPT", "0")
            .with_env("LC_ALL", "C");
        Self::with_gateway(Arc::new(gateway))
    }

    pub fn with_gateway(gateway: Arc<dyn CommandGateway>) -> Self {
        Self { gateway }
    }

    /// Runs git and maps a non-zero exit to [`GitError::CommandFailed`].
    pub async fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run_raw(cwd, args).await?;
        if !output.success() {
            return Err(GitError::CommandFailed {
                command: output.command,
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(GitOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Runs git and hands back the exit status for the caller to interpret.
    pub async fn run_raw<I, S>(&self, cwd: &Path, args: I) -> Result<CommandOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        Ok(self.gateway.exec(cwd, &owned_args).await?)
    }

    /// Whether git exits zero, for probe commands such as `show-ref --verify`.
    pub async fn succeeds<I, S>(&self, cwd: &Path, args: I) -> Result<bool, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self.run_raw(cwd, args).await?.success())
    }
}

pub fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
