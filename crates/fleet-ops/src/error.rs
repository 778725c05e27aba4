use std::path::PathBuf;

use fleet_core::action::{ActionKind, TargetKind};
use fleet_git::{GitError, WorktreeError};
use fleet_review::ReviewError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error("repository not found at {path}")]
    RepoNotFound { path: PathBuf },
    #[error("{action} applies to {}, not this target", target_noun(.expected))]
    WrongTarget {
        action: ActionKind,
        expected: TargetKind,
    },
    #[error("HEAD is detached in {path}")]
    DetachedHead { path: PathBuf },
    #[error("branch {branch} has no upstream")]
    NoUpstream { branch: String },
    #[error("main branch {name} exists neither locally nor on the remote")]
    NoMainBranch { name: String },
    #[error("rebase onto {onto} hit conflicts and was aborted: {detail}")]
    Conflict { onto: String, detail: String },
    #[error("pull request {reference} has no known head branch")]
    MissingHeadBranch { reference: String },
    #[error("clone destination {path} exists and is not a repository")]
    DestinationExists { path: PathBuf },
    #[error("could not clone {repo}: {detail}")]
    CloneFailed { repo: String, detail: String },
    #[error("permission denied at {path}: {source}")]
    FilesystemPermission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not open {url} in a browser: {source}")]
    Browser {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Review(#[from] ReviewError),
}

fn target_noun(kind: &TargetKind) -> &'static str {
    match kind {
        TargetKind::Repository => "repositories",
        TargetKind::ReviewRequest => "review requests",
    }
}

impl OpsError {
    /// Text for a failed per-target result: the underlying command's stderr
    /// where there is one.
    pub fn detail(&self) -> String {
        let detail = match self {
            OpsError::Git(err) | OpsError::Worktree(WorktreeError::Git(err)) => err.detail(),
            OpsError::Review(err) => err.detail(),
            other => other.to_string(),
        };
        if detail.trim().is_empty() {
            self.to_string()
        } else {
            detail
        }
    }

    /// Maps an I/O failure on `path`, keeping permission problems distinct.
    pub fn from_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            OpsError::FilesystemPermission { path, source }
        } else {
            OpsError::Filesystem { path, source }
        }
    }
}

pub fn looks_like_rebase_conflict(stdout: &str, stderr: &str) -> bool {
    let combined = format!("{stdout}\n{stderr}").to_ascii_lowercase();
    let markers = [
        "conflict",
        "could not apply",
        "resolve all conflicts manually",
        "fix conflicts",
    ];
    markers.iter().any(|marker| combined.contains(marker))
}
