use std::path::{Path, PathBuf};

use fleet_core::config::GitConfig;
use fleet_core::inventory::Inventory;
use fleet_core::types::{BranchHead, RepoIdentity, RepoState, Repository, SyncState};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::command::GitCli;
use crate::error::GitError;
use crate::lock::PathLocks;
use crate::repo::{ahead_behind, count_commits, current_branch, detect_main_branch, has_commits, remote_url, upstream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Added,
    Modified,
    Deleted,
    Renamed,
    Copied,
    Unmerged,
    Untracked,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub state: FileState,
    pub status_code: String,
}

/// Parses `status --porcelain=v1`. Ignored entries (`!!`) are dropped.
pub fn parse_porcelain_status(raw: &str) -> Result<Vec<ChangedFile>, GitError> {
    let mut files = Vec::new();

    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }

        if line.len() < 4 {
            return Err(GitError::Parse {
                context: format!("invalid porcelain status line: {line}"),
            });
        }

        let code = &line[0..2];
        if code == "!!" {
            continue;
        }
        let path = match line[3..].split_once(" -> ") {
            Some((_, renamed_to)) => renamed_to,
            None => &line[3..],
        };

        files.push(ChangedFile {
            path: PathBuf::from(path),
            state: file_state_from_code(code),
            status_code: code.to_string(),
        });
    }

    Ok(files)
}

fn file_state_from_code(code: &str) -> FileState {
    if code == "??" {
        return FileState::Untracked;
    }
    if code.contains('U') || code == "AA" || code == "DD" {
        return FileState::Unmerged;
    }
    if code.contains('A') {
        return FileState::Added;
    }
    if code.contains('M') {
        return FileState::Modified;
    }
    if code.contains('D') {
        return FileState::Deleted;
    }
    if code.contains('R') {
        return FileState::Renamed;
    }
    if code.contains('C') {
        return FileState::Copied;
    }
    FileState::Unknown
}

pub async fn changed_files(root: &Path, git: &GitCli) -> Result<Vec<ChangedFile>, GitError> {
    let output = git
        .run(root, ["status", "--porcelain=v1", "--untracked-files=normal"])
        .await?;
    parse_porcelain_status(&output.stdout)
}

/// Staged, unstaged and untracked changes all count.
pub async fn is_dirty(root: &Path, git: &GitCli) -> Result<bool, GitError> {
    Ok(!changed_files(root, git).await?.is_empty())
}

/// Derives [`RepoState`] for working trees using read-only git queries.
#[derive(Debug, Clone)]
pub struct Classifier {
    git: GitCli,
    config: GitConfig,
    locks: PathLocks,
}

impl Classifier {
    pub fn new(git: GitCli, config: GitConfig, locks: PathLocks) -> Self {
        Self { git, config, locks }
    }

    /// Returns `repo` with a freshly computed state. Holds a shared lock on
    /// the working directory while querying.
    #[instrument(skip_all, fields(repo = %repo.root.display()))]
    pub async fn classify(&self, repo: &Repository) -> Result<Repository, GitError> {
        if !repo.root.is_dir() {
            return Err(GitError::NotARepository {
                path: repo.root.clone(),
            });
        }
        let _guard = self.locks.read(&repo.root).await;
        let state = self.compute_state(repo).await?;
        debug!(branch = %state.branch, sync = %state.sync, dirty = state.dirty, "classified");
        Ok(repo.clone().with_state(state))
    }

    async fn compute_state(&self, repo: &Repository) -> Result<RepoState, GitError> {
        let root = repo.root.as_path();
        let git = &self.git;

        let branch = current_branch(root, git).await?;
        let born = has_commits(root, git).await?;
        let dirty = is_dirty(root, git).await?;

        let tracked = match (&branch, born) {
            (BranchHead::Named(name), true) => upstream(root, name, git).await?,
            _ => None,
        };
        let (ahead, behind) = match &tracked {
            Some(up) => ahead_behind(root, &up.tracking_ref(), git).await?,
            None => (0, 0),
        };

        let remote = tracked
            .as_ref()
            .map(|up| up.remote.clone())
            .filter(|remote| remote != ".")
            .unwrap_or_else(|| self.config.default_remote.clone());
        let identity = remote_url(root, &remote, git)
            .await?
            .as_deref()
            .and_then(RepoIdentity::from_remote_url);

        // Worktrees inherit the main-branch override of their primary.
        let override_name = repo
            .primary_root()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| repo.name.clone());
        let main = detect_main_branch(root, &override_name, &remote, &self.config, git).await?;

        let on_main = branch.name() == main.name || self.config.is_protected(branch.name());
        let behind_main = match (&main.reference, born) {
            (Some(reference), true) if !on_main => {
                count_commits(root, &format!("HEAD..{reference}"), git).await?
            }
            _ => 0,
        };
        let needs_rebase = behind_main > 0 && !branch.is_detached() && !on_main;

        let sync = SyncState::from_counts(
            branch.is_detached() || !born,
            tracked.is_some(),
            ahead,
            behind,
        );

        Ok(RepoState {
            branch,
            upstream: tracked,
            identity,
            dirty,
            ahead,
            behind,
            sync,
            main_branch: main.name,
            behind_main,
            needs_rebase,
        })
    }

    /// Classifies every repository with bounded parallelism, in input order.
    /// A failure marks that repository `unknown` and never aborts the rest.
    #[instrument(skip_all, fields(count = repos.len()))]
    pub async fn classify_all(&self, repos: Vec<Repository>, concurrency: usize) -> Vec<Repository> {
        stream::iter(repos)
            .map(|repo| async move {
                match self.classify(&repo).await {
                    Ok(classified) => classified,
                    Err(err) => {
                        warn!(repo = %repo.root.display(), error = %err, "classification failed");
                        repo.with_error(err.detail())
                    }
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Drops vanished working trees, then reclassifies everything else.
    pub async fn refresh(&self, inventory: &mut Inventory, concurrency: usize) -> Vec<PathBuf> {
        let removed = inventory.prune_missing();
        for path in &removed {
            debug!(path = %path.display(), "dropped vanished working tree");
        }
        let current = std::mem::take(inventory).into_vec();
        let classified = self.classify_all(current, concurrency).await;
        *inventory = Inventory::new(classified);
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use fleet_core::config::GitConfig;
    use fleet_core::types::{Repository, SyncState};

    use super::{parse_porcelain_status, Classifier, FileState};
    use crate::command::GitCli;
    use crate::lock::PathLocks;
    use crate::repo::test_support::{clone_with_remote, commit_file, init_repo, run_git, unique_temp_dir};
    use crate::scripted::ScriptedGateway;

    fn classifier(git: GitCli) -> Classifier {
        Classifier::new(git, GitConfig::default(), PathLocks::new())
    }

    #[test]
    fn porcelain_parse_covers_untracked_renames_and_ignored() {
        let files = parse_porcelain_status(
            " M src/lib.rs\n?? notes.txt\nR  old.rs -> new.rs\n!! target/\nUU conflict.rs\n",
        )
        .expect("parse");
        assert_eq!(files.len(), 4);
        assert_eq!(files[0].state, FileState::Modified);
        assert_eq!(files[1].state, FileState::Untracked);
        assert_eq!(files[2].path, Path::new("new.rs"));
        assert_eq!(files[2].state, FileState::Renamed);
        assert_eq!(files[3].state, FileState::Unmerged);
        assert!(parse_porcelain_status("M\n").is_err());
    }

    /// Scripted `feat/x` tracking `origin/feat/x` with the given counts and status.
    fn scripted_branch(root: &str, counts: &str, status: &str) -> ScriptedGateway {
        ScriptedGateway::new()
            .ok_in(root, "symbolic-ref --short -q HEAD", "feat/x\n")
            .ok_in(root, "rev-parse --verify -q HEAD", "abc\n")
            .ok_in(root, "status --porcelain=v1 --untracked-files=normal", status)
            .ok_in(
                root,
                "rev-parse --abbrev-ref --symbolic-full-name feat/x@{upstream}",
                "origin/feat/x\n",
            )
            .ok_in(root, "config --get branch.feat/x.remote", "origin\n")
            .ok_in(root, "rev-list --left-right --count HEAD...origin/feat/x", counts)
            .ok_in(root, "remote get-url origin", "git@github.com:org/app.git\n")
            .ok_in(root, "symbolic-ref --short -q refs/remotes/origin/HEAD", "origin/main\n")
            .ok_in(root, "show-ref --verify --quiet refs/remotes/origin/main", "")
            .ok_in(root, "rev-list --count HEAD..origin/main", "0\n")
    }

    #[tokio::test]
    async fn scripted_ahead_branch_classifies_ahead() {
        let root = unique_temp_dir("scripted-ahead");
        let root_str = root.to_string_lossy().into_owned();
        let gateway = Arc::new(scripted_branch(&root_str, "2\t0\n", ""));
        let classifier = classifier(GitCli::with_gateway(gateway.clone()));

        let repo = classifier
            .classify(&Repository::primary(&root))
            .await
            .expect("classify");
        let state = repo.state.expect("state");
        assert_eq!(state.sync, SyncState::Ahead);
        assert_eq!(state.ahead, 2);
        assert!(!state.dirty);
        assert!(!state.needs_rebase);
        assert_eq!(state.identity.expect("identity").full_name(), "org/app");
        assert!(gateway
            .calls()
            .iter()
            .all(|(_, args)| !args.starts_with("fetch") && !args.starts_with("push")));

        let _ = fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn dirty_facet_is_independent_of_sync() {
        let root = unique_temp_dir("scripted-dirty");
        let root_str = root.to_string_lossy().into_owned();
        let gateway = Arc::new(scripted_branch(&root_str, "0\t0\n", " M a.rs\n?? new.rs\n"));
        let classifier = classifier(GitCli::with_gateway(gateway));

        let state = classifier
            .classify(&Repository::primary(&root))
            .await
            .expect("classify")
            .state
            .expect("state");
        assert_eq!(state.sync, SyncState::InSync);
        assert!(state.dirty);
        assert_eq!(state.sync_label(), "modified");

        let _ = fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn missing_root_is_an_error_and_classify_all_marks_unknown() {
        let classifier = classifier(GitCli::default());
        let missing = Repository::primary("/definitely/missing/fleet-classify");
        assert!(classifier.classify(&missing).await.is_err());

        let repos = classifier.classify_all(vec![missing], 4).await;
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].sync(), SyncState::Unknown);
        assert!(repos[0].error.is_some());
    }

    #[tokio::test]
    async fn real_repositories_cover_local_only_ahead_and_needs_rebase() {
        let parent = unique_temp_dir("classify-real");
        let (clone, remote) = clone_with_remote(&parent, "app");
        let classifier = classifier(GitCli::default());

        // feat/y without upstream: local-only regardless of dirty state.
        run_git(&clone, &["checkout", "-q", "-b", "feat/y"]);
        fs::write(clone.join("scratch.txt"), "x\n").expect("write scratch");
        let repo = classifier
            .classify(&Repository::primary(&clone))
            .await
            .expect("classify");
        let state = repo.state.clone().expect("state");
        assert_eq!(state.sync, SyncState::LocalOnly);
        assert!(state.dirty);

        // Idempotent: classifying again yields the same record.
        let again = classifier.classify(&repo).await.expect("classify again");
        assert_eq!(again, repo);
        fs::remove_file(clone.join("scratch.txt")).expect("remove scratch");

        // feat/x pushed, then two local commits: ahead by two.
        run_git(&clone, &["checkout", "-q", "main"]);
        run_git(&clone, &["checkout", "-q", "-b", "feat/x"]);
        run_git(&clone, &["push", "-q", "-u", "origin", "feat/x"]);
        commit_file(&clone, "x1.txt", "1\n", "x1");
        commit_file(&clone, "x2.txt", "2\n", "x2");
        let state = classifier
            .classify(&Repository::primary(&clone))
            .await
            .expect("classify")
            .state
            .expect("state");
        assert_eq!(state.sync, SyncState::Ahead);
        assert_eq!(state.ahead, 2);
        assert!(!state.needs_rebase);

        // Main moves on the remote: feat/x now needs a rebase.
        let other = parent.join("other");
        run_git(&parent, &["clone", "-q", &remote.to_string_lossy(), "other"]);
        commit_file(&other, "main.txt", "m\n", "main moves");
        run_git(&other, &["push", "-q", "origin", "main"]);
        run_git(&clone, &["fetch", "-q", "origin"]);
        let state = classifier
            .classify(&Repository::primary(&clone))
            .await
            .expect("classify")
            .state
            .expect("state");
        assert_eq!(state.behind_main, 1);
        assert!(state.needs_rebase);
        assert_eq!(state.main_branch, "main");

        let _ = fs::remove_dir_all(&parent);
    }

    #[tokio::test]
    async fn fresh_repository_is_local_only_and_clean() {
        let root = init_repo(false);
        let classifier = classifier(GitCli::default());
        let state = classifier
            .classify(&Repository::primary(&root))
            .await
            .expect("classify")
            .state
            .expect("state");
        assert_eq!(state.sync, SyncState::LocalOnly);
        assert!(!state.dirty);
        assert_eq!(state.branch.name(), "main");

        let _ = fs::remove_dir_all(&root);
    }
}
