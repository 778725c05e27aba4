use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fleet_git::{CommandGateway, ProcessGateway, DEFAULT_TIMEOUT};

use crate::error::{looks_like_auth_failure, ReviewError};

/// Field list requested from `gh search prs`.
pub const SEARCH_FIELDS: &str = "number,title,repository,url,state";
/// Field list requested from `gh pr view`.
pub const VIEW_FIELDS: &str = "number,headRefName,state,url";
/// Field list requested from `gh pr list --head`.
pub const PR_LIST_FIELDS: &str = "state,number";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedReviewCommand {
    SearchOpenPrs,
    ViewPr,
    ClosePr,
    PrListByHead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GhOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct GhCli {
    gateway: Arc<dyn CommandGateway>,
}

impl Default for GhCli {
    fn default() -> Self {
        Self::new("gh", DEFAULT_TIMEOUT)
    }
}

impl GhCli {
    /// `gh` without prompts, pagers or colour codes.
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        let gateway = ProcessGateway::new(binary, timeout)
            .with_env("GH_PROMPT_DISABLED", "1")
            .with_env("GH_NO_UPDATE_NOTIFIER", "1")
            .with_env("GH_PAGER", "cat")
            .with_env("NO_COLOR", "1");
        Self::with_gateway(Arc::new(gateway))
    }

    pub fn with_gateway(gateway: Arc<dyn CommandGateway>) -> Self {
        Self { gateway }
    }

    /// Runs one allow-listed invocation. The argument shape is checked before
    /// anything is spawned.
    pub async fn run_allowed<I, S>(
        &self,
        cwd: &Path,
        allowed: AllowedReviewCommand,
        args: I,
    ) -> Result<GhOutput, ReviewError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        validate_contract(allowed, &owned_args)?;

        let output = self.gateway.exec(cwd, &owned_args).await?;
        if !output.success() {
            if looks_like_auth_failure(&output.stdout, &output.stderr) {
                return Err(ReviewError::AuthenticationRequired {
                    command: output.command,
                    detail: output.stderr.trim().to_string(),
                });
            }
            return Err(ReviewError::CommandFailed {
                command: output.command,
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Ok(GhOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn validate_contract(allowed: AllowedReviewCommand, args: &[OsString]) -> Result<(), ReviewError> {
    let ok = match allowed {
        AllowedReviewCommand::SearchOpenPrs => {
            args.len() == 10
                && arg_eq(args, 0, "search")
                && arg_eq(args, 1, "prs")
                && arg_eq(args, 2, "--author")
                && arg_eq(args, 3, "@me")
                && arg_eq(args, 4, "--state")
                && arg_eq(args, 5, "open")
                && arg_eq(args, 6, "--json")
                && arg_eq(args, 7, SEARCH_FIELDS)
                && arg_eq(args, 8, "--limit")
                && arg_at(args, 9).parse::<u32>().is_ok_and(|limit| limit > 0)
        }
        AllowedReviewCommand::ViewPr => {
            args.len() == 7
                && arg_eq(args, 0, "pr")
                && arg_eq(args, 1, "view")
                && is_pr_number(&arg_at(args, 2))
                && arg_eq(args, 3, "--repo")
                && is_full_name(&arg_at(args, 4))
                && arg_eq(args, 5, "--json")
                && arg_eq(args, 6, VIEW_FIELDS)
        }
        AllowedReviewCommand::ClosePr => {
            args.len() == 5
                && arg_eq(args, 0, "pr")
                && arg_eq(args, 1, "close")
                && is_pr_number(&arg_at(args, 2))
                && arg_eq(args, 3, "--repo")
                && is_full_name(&arg_at(args, 4))
        }
        AllowedReviewCommand::PrListByHead => {
            args.len() == 10
                && arg_eq(args, 0, "pr")
                && arg_eq(args, 1, "list")
                && arg_eq(args, 2, "--head")
                && is_branch(&arg_at(args, 3))
                && arg_eq(args, 4, "--state")
                && arg_eq(args, 5, "all")
                && arg_eq(args, 6, "--json")
                && arg_eq(args, 7, PR_LIST_FIELDS)
                && arg_eq(args, 8, "--limit")
                && arg_eq(args, 9, "1")
        }
    };

    if ok {
        return Ok(());
    }

    Err(ReviewError::ContractViolation {
        message: format!("disallowed review CLI invocation: {:?}", args),
    })
}

fn is_pr_number(value: &str) -> bool {
    value.parse::<u64>().is_ok_and(|number| number > 0)
}

/// Never empty and never parsed as a flag.
fn is_branch(value: &str) -> bool {
    !value.trim().is_empty() && !value.starts_with('-')
}

fn is_full_name(value: &str) -> bool {
    match value.split_once('/') {
        Some((owner, name)) => {
            !owner.trim().is_empty() && !name.trim().is_empty() && !name.contains('/')
        }
        None => false,
    }
}

fn arg_eq(args: &[OsString], idx: usize, expected: &str) -> bool {
    arg_at(args, idx) == expected
}

fn arg_at(args: &[OsString], idx: usize) -> String {
    args.get(idx)
        .map(|x| x.to_string_lossy().to_string())
        .unwrap_or_default()
}
