//! Repository, review-request and worktree records shared across the fleet crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Branch label reported for a working tree whose HEAD is not on a branch.
pub const DETACHED_BRANCH: &str = "DETACHED";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RepoKind {
    Primary,
    Worktree { primary: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum BranchHead {
    Named(String),
    Detached,
}

impl BranchHead {
    pub fn name(&self) -> &str {
        match self {
            BranchHead::Named(name) => name,
            BranchHead::Detached => DETACHED_BRANCH,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, BranchHead::Detached)
    }
}

impl fmt::Display for BranchHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `owner/name` of a hosted repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoIdentity {
    pub owner: String,
    pub name: String,
}

impl RepoIdentity {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parses `owner/name`.
    pub fn parse_full_name(full_name: &str) -> Option<Self> {
        let (owner, name) = full_name.trim().split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(owner, name))
    }

    /// Extracts the identity from an scp-style, ssh:// or https:// remote URL.
    pub fn from_remote_url(url: &str) -> Option<Self> {
        let url = url.trim();
        let path = if let Some((_, rest)) = url.split_once("://") {
            rest.split_once('/').map(|(_, path)| path)?
        } else if let Some((_, path)) = url.split_once(':') {
            path
        } else {
            return None;
        };

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let mut segments = path.rsplit('/').filter(|segment| !segment.is_empty());
        let name = segments.next()?;
        let owner = segments.next()?;
        Some(Self::new(owner, name))
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Hosting providers treat owner and name case-insensitively.
    pub fn same_as(&self, other: &RepoIdentity) -> bool {
        self.owner.eq_ignore_ascii_case(&other.owner) && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl fmt::Display for RepoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Upstream {
    pub remote: String,
    pub branch: String,
}

impl Upstream {
    /// Remote-tracking ref name, e.g. `origin/feat/x`.
    pub fn tracking_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.remote, self.branch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    LocalOnly,
    InSync,
    Ahead,
    Behind,
    Diverged,
    Unknown,
}

impl SyncState {
    /// First matching rule wins: detached or no upstream is local-only, then the
    /// ahead/behind pair decides.
    pub fn from_counts(detached: bool, has_upstream: bool, ahead: u32, behind: u32) -> Self {
        if detached || !has_upstream {
            return SyncState::LocalOnly;
        }
        match (ahead > 0, behind > 0) {
            (false, false) => SyncState::InSync,
            (true, false) => SyncState::Ahead,
            (false, true) => SyncState::Behind,
            (true, true) => SyncState::Diverged,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::LocalOnly => "local-only",
            SyncState::InSync => "in-sync",
            SyncState::Ahead => "ahead",
            SyncState::Behind => "behind",
            SyncState::Diverged => "diverged",
            SyncState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeState {
    Clean,
    Modified,
}

impl TreeState {
    pub fn from_dirty(dirty: bool) -> Self {
        if dirty {
            TreeState::Modified
        } else {
            TreeState::Clean
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TreeState::Clean => "clean",
            TreeState::Modified => "modified",
        }
    }
}

/// Classified facets of one working tree. Sync and dirty are independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    pub branch: BranchHead,
    pub upstream: Option<Upstream>,
    pub identity: Option<RepoIdentity>,
    pub dirty: bool,
    pub ahead: u32,
    pub behind: u32,
    pub sync: SyncState,
    pub main_branch: String,
    pub behind_main: u32,
    pub needs_rebase: bool,
}

impl RepoState {
    pub fn tree_state(&self) -> TreeState {
        TreeState::from_dirty(self.dirty)
    }

    /// Short status text: `clean`/`modified` when in sync, otherwise the sync
    /// state with its counts.
    pub fn sync_label(&self) -> String {
        match self.sync {
            SyncState::InSync => self.tree_state().as_str().to_string(),
            SyncState::Ahead => format!("ahead (+{})", self.ahead),
            SyncState::Behind => format!("behind (-{})", self.behind),
            SyncState::Diverged => format!("diverged (+{}/-{})", self.ahead, self.behind),
            other => other.as_str().to_string(),
        }
    }
}

/// One working tree: a primary checkout or a linked worktree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub root: PathBuf,
    pub name: String,
    pub kind: RepoKind,
    #[serde(default)]
    pub state: Option<RepoState>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub selected: bool,
    /// Branch the primary's worktree listing reports for this tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listed_branch: Option<String>,
    /// Pull request for the checked-out branch, when it was looked up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_status: Option<PrStatus>,
}

impl Repository {
    pub fn primary(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: dir_name(&root),
            root,
            kind: RepoKind::Primary,
            state: None,
            error: None,
            selected: false,
            listed_branch: None,
            pr_status: None,
        }
    }

    pub fn worktree(root: impl Into<PathBuf>, primary: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: dir_name(&root),
            root,
            kind: RepoKind::Worktree {
                primary: primary.into(),
            },
            state: None,
            error: None,
            selected: false,
            listed_branch: None,
            pr_status: None,
        }
    }

    pub fn is_worktree(&self) -> bool {
        matches!(self.kind, RepoKind::Worktree { .. })
    }

    /// Root of the repository owning this tree's history.
    pub fn primary_root(&self) -> &Path {
        match &self.kind {
            RepoKind::Primary => &self.root,
            RepoKind::Worktree { primary } => primary,
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.state.as_ref().map(|state| state.branch.name())
    }

    /// Classified branch, else the one discovery saw in the worktree listing.
    pub fn checked_out_branch(&self) -> Option<&str> {
        self.branch().or(self.listed_branch.as_deref())
    }

    pub fn with_listed_branch(mut self, branch: Option<String>) -> Self {
        self.listed_branch = branch;
        self
    }

    pub fn with_pr_status(mut self, status: PrStatus) -> Self {
        self.pr_status = Some(status);
        self
    }

    pub fn sync(&self) -> SyncState {
        match (&self.state, &self.error) {
            (Some(state), None) => state.sync,
            _ => SyncState::Unknown,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.dirty)
    }

    pub fn identity(&self) -> Option<&RepoIdentity> {
        self.state.as_ref().and_then(|state| state.identity.as_ref())
    }

    pub fn with_state(mut self, state: RepoState) -> Self {
        self.state = Some(state);
        self.error = None;
        self
    }

    /// Drops the classified facets; a failed refresh leaves the tree `unknown`.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.state = None;
        self.error = Some(error.into());
        self
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorktreeMapping {
    pub primary_root: PathBuf,
    pub branch: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LocalStatus {
    CheckedOut { path: PathBuf },
    Available { path: PathBuf },
    NotCloned,
}

impl LocalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalStatus::CheckedOut { .. } => "checked-out",
            LocalStatus::Available { .. } => "available",
            LocalStatus::NotCloned => "not-cloned",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            LocalStatus::CheckedOut { path } | LocalStatus::Available { path } => Some(path),
            LocalStatus::NotCloned => None,
        }
    }
}

/// Most recent pull request whose head is a tree's branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PrStatus {
    /// Main, protected or detached: such branches are not reviewed.
    NotApplicable,
    NoPr,
    Open { number: u64 },
    Merged { number: u64 },
    Closed { number: u64 },
    /// The lookup failed.
    Unknown,
}

impl PrStatus {
    pub fn label(&self) -> String {
        match self {
            PrStatus::NotApplicable => "-".to_string(),
            PrStatus::NoPr => "No PR".to_string(),
            PrStatus::Open { number } => format!("Open #{number}"),
            PrStatus::Merged { number } => format!("Merged #{number}"),
            PrStatus::Closed { number } => format!("Closed #{number}"),
            PrStatus::Unknown => "?".to_string(),
        }
    }
}

/// An open review request authored by the authenticated user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub repo: RepoIdentity,
    pub number: u64,
    pub title: String,
    pub head_branch: String,
    pub repo_url: String,
    pub url: String,
    pub local_status: LocalStatus,
}

impl ReviewRequest {
    /// `owner/name#number`.
    pub fn reference(&self) -> String {
        format!("{}#{}", self.repo, self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAllocation {
    pub number: u32,
    pub number_label: String,
    pub slug: String,
    pub branch: String,
    pub worktree_path: PathBuf,
    pub spec_path: PathBuf,
}
