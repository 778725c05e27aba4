use std::path::PathBuf;
use std::string::FromUtf8Error;
use std::time::Duration;

/// Failure to run a command at all. A non-zero exit is not a gateway error.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("command failed to start ({command}): {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {after:?} ({command})")]
    Timeout { command: String, after: Duration },
    #[error("command output was not valid UTF-8 ({command}, {stream}): {source}")]
    NonUtf8Output {
        command: String,
        stream: &'static str,
        #[source]
        source: FromUtf8Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("git command returned non-zero exit ({command}) status={status:?}")]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("path is not inside a git repository: {path}")]
    NotARepository { path: PathBuf },
    #[error("invalid git output: {context}")]
    Parse { context: String },
}

impl GitError {
    /// Stderr of a failed command, or the rendered error otherwise.
    pub fn detail(&self) -> String {
        match self {
            GitError::CommandFailed { stderr, stdout, .. } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.to_string()
                }
            }
            other => other.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GitError::Gateway(GatewayError::Timeout { .. }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error("branch {branch} is already checked out at {path}")]
    BranchAlreadyCheckedOut { branch: String, path: PathBuf },
    #[error("worktree path {path} is already taken{}", taken_by(.existing_branch))]
    PathCollision {
        path: PathBuf,
        existing_branch: Option<String>,
    },
    #[error("worktree {path} has uncommitted changes; force removal to discard them")]
    DirtyWorktreeBlocksRemoval { path: PathBuf },
    #[error("refusing to remove primary repository {path}")]
    RefusePrimary { path: PathBuf },
    #[error("invalid branch name: {branch:?}")]
    InvalidBranchName { branch: String },
    #[error("branch {branch} exists neither locally nor on {remote}")]
    BranchNotFound { branch: String, remote: String },
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Git(#[from] GitError),
}

fn taken_by(branch: &Option<String>) -> String {
    branch
        .as_ref()
        .map(|branch| format!(" by branch {branch}"))
        .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum FeatureError {
    #[error("feature description has no significant words")]
    NoDescriptionProvided,
    #[error("branch {branch} already exists")]
    BranchExists { branch: String },
    #[error("no feature number follows {highest}")]
    NumberExhausted { highest: u32 },
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spec seeding task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Git(#[from] GitError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan root {path} is not a readable directory: {source}")]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("directory walk aborted: {0}")]
    Walk(#[from] tokio::task::JoinError),
}
