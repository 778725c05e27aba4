//! Bulk actions, their targets and per-target results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::{Repository, ReviewRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Fetch,
    Pull,
    Rebase,
    ForcePush,
    CreateRemoteBranch,
    Stash,
    Discard,
    ResetToRemote,
    DeleteLocalFolder,
    CheckoutPrToWorktree,
    OpenInBrowser,
    ClosePr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Repository,
    ReviewRequest,
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        ActionKind::Fetch,
        ActionKind::Pull,
        ActionKind::Rebase,
        ActionKind::ForcePush,
        ActionKind::CreateRemoteBranch,
        ActionKind::Stash,
        ActionKind::Discard,
        ActionKind::ResetToRemote,
        ActionKind::DeleteLocalFolder,
        ActionKind::CheckoutPrToWorktree,
        ActionKind::OpenInBrowser,
        ActionKind::ClosePr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Fetch => "fetch",
            ActionKind::Pull => "pull",
            ActionKind::Rebase => "rebase",
            ActionKind::ForcePush => "force-push",
            ActionKind::CreateRemoteBranch => "create-remote-branch",
            ActionKind::Stash => "stash",
            ActionKind::Discard => "discard",
            ActionKind::ResetToRemote => "reset-to-remote",
            ActionKind::DeleteLocalFolder => "delete-local-folder",
            ActionKind::CheckoutPrToWorktree => "checkout-pr",
            ActionKind::OpenInBrowser => "open-in-browser",
            ActionKind::ClosePr => "close-pr",
        }
    }

    pub fn target_kind(self) -> TargetKind {
        match self {
            ActionKind::CheckoutPrToWorktree | ActionKind::OpenInBrowser | ActionKind::ClosePr => {
                TargetKind::ReviewRequest
            }
            _ => TargetKind::Repository,
        }
    }

    /// Actions that lose local work or remote state and need the caller's
    /// confirmation before being run.
    pub fn is_destructive(self) -> bool {
        matches!(
            self,
            ActionKind::Discard
                | ActionKind::ResetToRemote
                | ActionKind::DeleteLocalFolder
                | ActionKind::ForcePush
                | ActionKind::ClosePr
        )
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace('_', "-");
        ActionKind::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| {
                let valid = ActionKind::ALL
                    .iter()
                    .map(|action| action.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("invalid action '{value}'. valid values: {valid}")
            })
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Target {
    Repository(Repository),
    ReviewRequest(ReviewRequest),
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        match self {
            Target::Repository(_) => TargetKind::Repository,
            Target::ReviewRequest(_) => TargetKind::ReviewRequest,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Target::Repository(repo) => repo.name.clone(),
            Target::ReviewRequest(pr) => pr.reference(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Target::Repository(repo) => Some(&repo.root),
            Target::ReviewRequest(pr) => pr.local_status.path(),
        }
    }

    pub fn reference(&self) -> TargetRef {
        TargetRef {
            label: self.label(),
            path: self.path().map(Path::to_path_buf),
        }
    }
}

impl From<Repository> for Target {
    fn from(repo: Repository) -> Self {
        Target::Repository(repo)
    }
}

impl From<ReviewRequest> for Target {
    fn from(pr: ReviewRequest) -> Self {
        Target::ReviewRequest(pr)
    }
}

/// Identity of a bulk target as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRef {
    pub label: String,
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "ok",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub target: TargetRef,
    pub action: ActionKind,
    pub outcome: Outcome,
    pub detail: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl BulkOperationResult {
    pub fn success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl BulkSummary {
    pub fn from_results(results: &[BulkOperationResult]) -> Self {
        let mut summary = BulkSummary::default();
        for result in results {
            match result.outcome {
                Outcome::Succeeded => summary.succeeded += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}
