use std::ffi::OsString;
use std::path::{Path, PathBuf};

use fleet_core::slug::slugify;
use fleet_core::types::{WorktreeMapping, DETACHED_BRANCH};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::command::GitCli;
use crate::error::{GitError, WorktreeError};
use crate::lock::PathLocks;
use crate::repo::{is_valid_branch_name, local_branch_exists, remote_branch_exists};
use crate::status::is_dirty;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListedWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
    pub head: Option<String>,
    pub bare: bool,
    pub detached: bool,
    pub prunable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Create the branch from the primary's HEAD when it does not exist.
    pub create_branch: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    /// Discard uncommitted changes instead of refusing.
    pub force: bool,
}

/// Flat sibling path for a branch: `<parent>/<primary-name>-<slug(branch)>`.
pub fn worktree_path(primary: &Path, branch: &str) -> Result<PathBuf, WorktreeError> {
    let slug = slugify(branch);
    if slug.is_empty() {
        return Err(WorktreeError::InvalidBranchName {
            branch: branch.to_string(),
        });
    }
    let name = primary
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string());
    let parent = primary.parent().unwrap_or(primary);
    Ok(parent.join(format!("{name}-{slug}")))
}

pub async fn list_worktrees(primary: &Path, git: &GitCli) -> Result<Vec<ListedWorktree>, GitError> {
    let output = git.run(primary, ["worktree", "list", "--porcelain"]).await?;
    parse_worktree_list(&output.stdout)
}

#[derive(Debug, Clone)]
pub struct WorktreeManager {
    git: GitCli,
    remote: String,
    locks: PathLocks,
}

impl WorktreeManager {
    pub fn new(git: GitCli, remote: impl Into<String>, locks: PathLocks) -> Self {
        Self {
            git,
            remote: remote.into(),
            locks,
        }
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Linked worktrees of `primary`; the primary checkout itself is excluded.
    pub async fn list(&self, primary: &Path) -> Result<Vec<WorktreeMapping>, WorktreeError> {
        let listed = list_worktrees(primary, &self.git).await?;
        Ok(listed
            .into_iter()
            .filter(|entry| !entry.bare && !same_path(&entry.path, primary))
            .map(|entry| WorktreeMapping {
                primary_root: primary.to_path_buf(),
                branch: entry
                    .branch
                    .unwrap_or_else(|| DETACHED_BRANCH.to_string()),
                path: entry.path,
            })
            .collect())
    }

    pub async fn find_by_branch(
        &self,
        primary: &Path,
        branch: &str,
    ) -> Result<Option<WorktreeMapping>, WorktreeError> {
        Ok(self
            .list(primary)
            .await?
            .into_iter()
            .find(|mapping| mapping.branch == branch))
    }

    /// Creates (or returns the existing) worktree for `branch` beside `primary`.
    #[instrument(skip_all, fields(primary = %primary.display(), branch = %branch))]
    pub async fn create_worktree(
        &self,
        primary: &Path,
        branch: &str,
        options: CreateOptions,
    ) -> Result<WorktreeMapping, WorktreeError> {
        let _guard = self.locks.write(primary).await;
        self.create_worktree_unlocked(primary, branch, options).await
    }

    /// Same as [`Self::create_worktree`] for callers already holding the
    /// primary's exclusive lock.
    pub async fn create_worktree_unlocked(
        &self,
        primary: &Path,
        branch: &str,
        options: CreateOptions,
    ) -> Result<WorktreeMapping, WorktreeError> {
        if !is_valid_branch_name(primary, branch, &self.git).await? {
            return Err(WorktreeError::InvalidBranchName {
                branch: branch.to_string(),
            });
        }
        let path = worktree_path(primary, branch)?;
        let mut listed = list_worktrees(primary, &self.git).await?;
        // A registration whose directory is gone would otherwise be reused
        // or block the branch.
        if listed
            .iter()
            .any(|entry| !entry.bare && (entry.prunable || !entry.path.exists()))
        {
            debug!("pruning stale worktree registrations");
            self.git.run(primary, ["worktree", "prune"]).await?;
            listed = list_worktrees(primary, &self.git).await?;
        }

        if let Some(live) = listed
            .iter()
            .find(|entry| entry.branch.as_deref() == Some(branch))
        {
            if same_path(&live.path, &path) {
                return Ok(WorktreeMapping {
                    primary_root: primary.to_path_buf(),
                    branch: branch.to_string(),
                    path,
                });
            }
            return Err(WorktreeError::BranchAlreadyCheckedOut {
                branch: branch.to_string(),
                path: live.path.clone(),
            });
        }

        if let Some(occupant) = listed.iter().find(|entry| same_path(&entry.path, &path)) {
            return Err(WorktreeError::PathCollision {
                path,
                existing_branch: occupant.branch.clone(),
            });
        }
        if path.exists() {
            return Err(WorktreeError::PathCollision {
                path,
                existing_branch: None,
            });
        }

        let path_arg = path.as_os_str().to_os_string();
        let mut args: Vec<OsString> = vec!["worktree".into(), "add".into()];
        if local_branch_exists(primary, branch, &self.git).await? {
            args.extend([path_arg, branch.into()]);
        } else if options.create_branch {
            args.extend(["-b".into(), branch.into(), path_arg, "HEAD".into()]);
        } else if remote_branch_exists(primary, &self.remote, branch, &self.git).await? {
            let tracking = format!("{}/{}", self.remote, branch);
            args.extend([
                "--track".into(),
                "-b".into(),
                branch.into(),
                path_arg,
                tracking.into(),
            ]);
        } else {
            return Err(WorktreeError::BranchNotFound {
                branch: branch.to_string(),
                remote: self.remote.clone(),
            });
        }

        self.git.run(primary, args).await?;
        info!(branch, path = %path.display(), "created worktree");
        Ok(WorktreeMapping {
            primary_root: primary.to_path_buf(),
            branch: branch.to_string(),
            path,
        })
    }

    /// Deregisters and deletes a linked worktree. Never touches the primary.
    #[instrument(skip_all, fields(path = %mapping.path.display(), force = options.force))]
    pub async fn remove_worktree(
        &self,
        mapping: &WorktreeMapping,
        options: RemoveOptions,
    ) -> Result<(), WorktreeError> {
        if same_path(&mapping.path, &mapping.primary_root) || mapping.path.join(".git").is_dir() {
            return Err(WorktreeError::RefusePrimary {
                path: mapping.path.clone(),
            });
        }

        let _guards = self
            .locks
            .write_many([mapping.primary_root.as_path(), mapping.path.as_path()])
            .await;

        if !options.force && mapping.path.exists() && is_dirty(&mapping.path, &self.git).await? {
            return Err(WorktreeError::DirtyWorktreeBlocksRemoval {
                path: mapping.path.clone(),
            });
        }

        let mut args: Vec<OsString> = vec!["worktree".into(), "remove".into()];
        if options.force {
            args.push("--force".into());
        }
        args.push(mapping.path.as_os_str().to_os_string());
        self.git.run(&mapping.primary_root, args).await?;

        info!(branch = %mapping.branch, "removed worktree");
        Ok(())
    }
}

/// Compares two paths, resolving symlinks when both exist.
pub fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub fn parse_worktree_list(raw: &str) -> Result<Vec<ListedWorktree>, GitError> {
    let mut listed = Vec::new();
    let mut current: Option<ListedWorktree> = None;

    for line in raw.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(entry) = current.take() {
                listed.push(entry);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                listed.push(entry);
            }
            current = Some(ListedWorktree {
                path: PathBuf::from(rest.trim()),
                branch: None,
                head: None,
                bare: false,
                detached: false,
                prunable: false,
            });
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(rest) = line.strip_prefix("branch ") {
            entry.branch = Some(rest.trim().trim_start_matches("refs/heads/").to_string());
        } else if let Some(rest) = line.strip_prefix("HEAD ") {
            entry.head = Some(rest.trim().to_string());
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "detached" {
            entry.detached = true;
        } else if line.starts_with("prunable") {
            entry.prunable = true;
        }
    }

    if listed.is_empty() && !raw.trim().is_empty() {
        return Err(GitError::Parse {
            context: "unable to parse git worktree list output".to_string(),
        });
    }

    Ok(listed)
}
