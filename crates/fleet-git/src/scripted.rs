//! A [`CommandGateway`] that answers from a script instead of spawning
//! processes. Used to drive classification and review matching in tests.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::{CommandGateway, CommandOutput};
use crate::error::GatewayError;

#[derive(Debug, Clone)]
struct Rule {
    cwd: Option<PathBuf>,
    args: String,
    output: ScriptedOutput,
}

#[derive(Debug, Clone)]
struct ScriptedOutput {
    status: i32,
    stdout: String,
    stderr: String,
}

/// Responses are keyed by the space-joined argument list. A rule bound to a
/// working directory wins over one without. Unscripted commands exit 127.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(PathBuf, String)>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ok(self, args: &str, stdout: &str) -> Self {
        self.push(None, args, 0, stdout, "")
    }

    pub fn fail(self, args: &str, status: i32, stderr: &str) -> Self {
        self.push(None, args, status, "", stderr)
    }

    pub fn ok_in(self, cwd: impl Into<PathBuf>, args: &str, stdout: &str) -> Self {
        self.push(Some(cwd.into()), args, 0, stdout, "")
    }

    pub fn fail_in(self, cwd: impl Into<PathBuf>, args: &str, status: i32, stderr: &str) -> Self {
        self.push(Some(cwd.into()), args, status, "", stderr)
    }

    fn push(self, cwd: Option<PathBuf>, args: &str, status: i32, stdout: &str, stderr: &str) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                cwd,
                args: args.to_string(),
                output: ScriptedOutput {
                    status,
                    stdout: stdout.to_string(),
                    stderr: stderr.to_string(),
                },
            });
        }
        self
    }

    /// Every command seen so far, as `(cwd, args)`.
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn lookup(&self, cwd: &Path, args: &str) -> Option<ScriptedOutput> {
        let rules = self.rules.lock().ok()?;
        rules
            .iter()
            .find(|rule| rule.args == args && rule.cwd.as_deref() == Some(cwd))
            .or_else(|| {
                rules
                    .iter()
                    .find(|rule| rule.args == args && rule.cwd.is_none())
            })
            .map(|rule| rule.output.clone())
    }
}

#[async_trait]
impl CommandGateway for ScriptedGateway {
    async fn exec(&self, cwd: &Path, args: &[OsString]) -> Result<CommandOutput, GatewayError> {
        let joined = args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((cwd.to_path_buf(), joined.clone()));
        }

        let output = self.lookup(cwd, &joined).unwrap_or(ScriptedOutput {
            status: 127,
            stdout: String::new(),
            stderr: format!("unscripted command: {joined}"),
        });
        Ok(CommandOutput {
            command: format!("scripted {joined}"),
            status: Some(output.status),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptedGateway;
    use crate::command::GitCli;
    use std::path::Path;
    use std::sync::Arc;

    #[tokio::test]
    async fn cwd_bound_rules_take_precedence() {
        let gateway = Arc::new(
            ScriptedGateway::new()
                .ok("symbolic-ref --short -q HEAD", "main\n")
                .ok_in("/work/app", "symbolic-ref --short -q HEAD", "feat/x\n"),
        );
        let git = GitCli::with_gateway(gateway.clone());

        let app = git
            .run(Path::new("/work/app"), ["symbolic-ref", "--short", "-q", "HEAD"])
            .await
            .expect("scripted");
        let lib = git
            .run(Path::new("/work/lib"), ["symbolic-ref", "--short", "-q", "HEAD"])
            .await
            .expect("scripted");

        assert_eq!(app.stdout, "feat/x\n");
        assert_eq!(lib.stdout, "main\n");
        assert_eq!(gateway.calls().len(), 2);
    }

    #[tokio::test]
    async fn unscripted_commands_exit_non_zero() {
        let git = GitCli::with_gateway(Arc::new(ScriptedGateway::new()));
        let output = git
            .run_raw(Path::new("/work/app"), ["status"])
            .await
            .expect("scripted gateway never fails to run");
        assert_eq!(output.status, Some(127));
        assert!(output.stderr.contains("unscripted command: status"));
    }
}
