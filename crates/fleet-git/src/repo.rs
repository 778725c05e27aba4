//! Read-only repository queries.

use std::path::{Path, PathBuf};

use fleet_core::config::GitConfig;
use fleet_core::types::{BranchHead, Upstream};

use crate::command::GitCli;
use crate::error::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub root: PathBuf,
    pub git_dir: PathBuf,
    pub common_dir: PathBuf,
}

impl RepoHandle {
    pub fn is_linked_worktree(&self) -> bool {
        self.git_dir != self.common_dir
    }

    /// Working directory of the repository owning this tree's history.
    pub fn primary_root(&self) -> PathBuf {
        if !self.is_linked_worktree() {
            return self.root.clone();
        }
        self.common_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }
}

pub async fn discover_repo(start_path: &Path, git: &GitCli) -> Result<RepoHandle, GitError> {
    let inside = match git.run(start_path, ["rev-parse", "--is-inside-work-tree"]).await {
        Ok(output) => output.stdout.trim().eq("true"),
        Err(GitError::CommandFailed { .. }) => false,
        Err(err) => return Err(err),
    };

    if !inside {
        return Err(GitError::NotARepository {
            path: start_path.to_path_buf(),
        });
    }

    let root_raw = git.run(start_path, ["rev-parse", "--show-toplevel"]).await?;
    let root = PathBuf::from(root_raw.stdout.trim());

    let dirs = git
        .run(&root, ["rev-parse", "--git-dir", "--git-common-dir"])
        .await?;
    let mut lines = dirs.stdout.lines().map(str::trim);
    let (Some(git_dir), Some(common_dir)) = (lines.next(), lines.next()) else {
        return Err(GitError::Parse {
            context: format!("expected git dir and common dir, got {:?}", dirs.stdout),
        });
    };

    Ok(RepoHandle {
        git_dir: absolutize(&root, git_dir),
        common_dir: absolutize(&root, common_dir),
        root,
    })
}

fn absolutize(root: &Path, raw: &str) -> PathBuf {
    let path = PathBuf::from(raw);
    let joined = if path.is_absolute() { path } else { root.join(path) };
    std::fs::canonicalize(&joined).unwrap_or(joined)
}

/// Current branch, or [`BranchHead::Detached`] when HEAD is not symbolic.
/// An unborn branch in a fresh repository still reports its name.
pub async fn current_branch(root: &Path, git: &GitCli) -> Result<BranchHead, GitError> {
    let output = git
        .run_raw(root, ["symbolic-ref", "--short", "-q", "HEAD"])
        .await?;
    let name = output.stdout.trim();
    if output.success() && !name.is_empty() {
        Ok(BranchHead::Named(name.to_string()))
    } else {
        Ok(BranchHead::Detached)
    }
}

pub async fn has_commits(root: &Path, git: &GitCli) -> Result<bool, GitError> {
    git.succeeds(root, ["rev-parse", "--verify", "-q", "HEAD"]).await
}

pub async fn head_sha(root: &Path, git: &GitCli) -> Result<String, GitError> {
    let output = git.run(root, ["rev-parse", "HEAD"]).await?;
    Ok(output.stdout.trim().to_string())
}

/// Configured upstream of `branch`, if any.
pub async fn upstream(root: &Path, branch: &str, git: &GitCli) -> Result<Option<Upstream>, GitError> {
    let spec = format!("{branch}@{{upstream}}");
    let output = git
        .run_raw(root, ["rev-parse", "--abbrev-ref", "--symbolic-full-name", spec.as_str()])
        .await?;
    let tracking = output.stdout.trim();
    if !output.success() || tracking.is_empty() {
        return Ok(None);
    }

    let remote_key = format!("branch.{branch}.remote");
    let remote_out = git.run_raw(root, ["config", "--get", remote_key.as_str()]).await?;
    let remote = remote_out.stdout.trim();

    let upstream = if remote_out.success() && !remote.is_empty() && remote != "." {
        Upstream {
            remote: remote.to_string(),
            branch: tracking
                .strip_prefix(&format!("{remote}/"))
                .unwrap_or(tracking)
                .to_string(),
        }
    } else {
        let (remote, branch) = tracking.split_once('/').unwrap_or((".", tracking));
        Upstream {
            remote: remote.to_string(),
            branch: branch.to_string(),
        }
    };
    Ok(Some(upstream))
}

pub async fn remote_url(root: &Path, remote: &str, git: &GitCli) -> Result<Option<String>, GitError> {
    let output = git.run_raw(root, ["remote", "get-url", remote]).await?;
    let url = output.stdout.trim();
    Ok((output.success() && !url.is_empty()).then(|| url.to_string()))
}

pub async fn local_branch_exists(root: &Path, branch: &str, git: &GitCli) -> Result<bool, GitError> {
    let reference = format!("refs/heads/{branch}");
    git.succeeds(root, ["show-ref", "--verify", "--quiet", reference.as_str()])
        .await
}

pub async fn remote_branch_exists(
    root: &Path,
    remote: &str,
    branch: &str,
    git: &GitCli,
) -> Result<bool, GitError> {
    let reference = format!("refs/remotes/{remote}/{branch}");
    git.succeeds(root, ["show-ref", "--verify", "--quiet", reference.as_str()])
        .await
}

pub async fn is_valid_branch_name(root: &Path, branch: &str, git: &GitCli) -> Result<bool, GitError> {
    if branch.trim().is_empty() || branch.starts_with('-') || branch == "HEAD" {
        return Ok(false);
    }
    git.succeeds(root, ["check-ref-format", "--branch", branch]).await
}

/// `(ahead, behind)` of HEAD relative to `reference`.
pub async fn ahead_behind(root: &Path, reference: &str, git: &GitCli) -> Result<(u32, u32), GitError> {
    let range = format!("HEAD...{reference}");
    let output = git
        .run(root, ["rev-list", "--left-right", "--count", range.as_str()])
        .await?;
    parse_left_right_counts(&output.stdout)
}

pub async fn count_commits(root: &Path, range: &str, git: &GitCli) -> Result<u32, GitError> {
    let output = git.run(root, ["rev-list", "--count", range]).await?;
    output
        .stdout
        .trim()
        .parse()
        .map_err(|_| GitError::Parse {
            context: format!("expected commit count, got {:?}", output.stdout),
        })
}

pub fn parse_left_right_counts(raw: &str) -> Result<(u32, u32), GitError> {
    let mut fields = raw.split_whitespace().map(str::parse::<u32>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(left)), Some(Ok(right)), None) => Ok((left, right)),
        _ => Err(GitError::Parse {
            context: format!("expected two counts, got {raw:?}"),
        }),
    }
}

/// Main branch of a repository and the ref it is compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainBranch {
    pub name: String,
    /// Remote-tracking ref when one exists, else the local branch, else none.
    pub reference: Option<String>,
}

/// Resolution order: configured override for the repository name, the
/// remote's `HEAD`, the first of `main`/`master` that exists, then `main`.
pub async fn detect_main_branch(
    root: &Path,
    repo_name: &str,
    remote: &str,
    config: &GitConfig,
    git: &GitCli,
) -> Result<MainBranch, GitError> {
    let name = match config.main_branch_override(repo_name) {
        Some(name) => name.to_string(),
        None => detect_main_name(root, remote, git).await?,
    };

    let reference = if remote_branch_exists(root, remote, &name, git).await? {
        Some(format!("{remote}/{name}"))
    } else if local_branch_exists(root, &name, git).await? {
        Some(name.clone())
    } else {
        None
    };
    Ok(MainBranch { name, reference })
}

async fn detect_main_name(root: &Path, remote: &str, git: &GitCli) -> Result<String, GitError> {
    let head_ref = format!("refs/remotes/{remote}/HEAD");
    let output = git
        .run_raw(root, ["symbolic-ref", "--short", "-q", head_ref.as_str()])
        .await?;
    if output.success() {
        let target = output.stdout.trim();
        if let Some(name) = target.strip_prefix(&format!("{remote}/")) {
            if !name.is_empty() {
                return Ok(name.to_string());
            }
        }
    }

    for candidate in ["main", "master"] {
        if local_branch_exists(root, candidate, git).await?
            || remote_branch_exists(root, remote, candidate, git).await?
        {
            return Ok(candidate.to_string());
        }
    }
    Ok("main".to_string())
}


#[cfg(test)]
mod tests {
    use std::fs;

    use super::test_support::{clone_with_remote, commit_file, init_repo, run_git, unique_temp_dir};
    use super::{
        ahead_behind, current_branch, detect_main_branch, discover_repo, has_commits, head_sha,
        parse_left_right_counts, upstream,
    };
    use crate::command::GitCli;
    use crate::error::GitError;
    use fleet_core::config::GitConfig;
    use fleet_core::types::BranchHead;

    #[tokio::test]
    async fn discover_repo_finds_root_from_nested_path() {
        let root = init_repo(false);
        let nested = root.join("a").join("b");
        fs::create_dir_all(&nested).expect("create nested dir");

        let git = GitCli::default();
        let repo = discover_repo(&nested, &git).await.expect("discover repo");

        assert_eq!(repo.root, root);
        assert_eq!(repo.git_dir, repo.root.join(".git"));
        assert!(!repo.is_linked_worktree());
        assert_eq!(repo.primary_root(), root);

        let _ = fs::remove_dir_all(&repo.root);
    }

    #[tokio::test]
    async fn discover_repo_returns_not_a_repository_for_plain_directory() {
        let dir = unique_temp_dir("not-repo");

        let git = GitCli::default();
        let err = discover_repo(&dir, &git)
            .await
            .expect_err("expected not a repository");
        assert!(matches!(err, GitError::NotARepository { path } if path == dir));

        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn discover_repo_resolves_primary_of_linked_worktree() {
        let root = init_repo(true);
        let linked = root.with_file_name(format!(
            "{}-linked",
            root.file_name().expect("name").to_string_lossy()
        ));
        run_git(&root, &["worktree", "add", "-q", "-b", "feat/linked", &linked.to_string_lossy()]);

        let git = GitCli::default();
        let handle = discover_repo(&linked, &git).await.expect("discover worktree");
        assert!(handle.is_linked_worktree());
        assert_eq!(handle.primary_root(), root);

        let _ = fs::remove_dir_all(&linked);
        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn fresh_repository_has_unborn_named_branch() {
        let root = init_repo(false);
        let git = GitCli::default();

        assert_eq!(
            current_branch(&root, &git).await.expect("branch"),
            BranchHead::Named("main".to_string())
        );
        assert!(!has_commits(&root, &git).await.expect("probe"));

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn detached_head_is_reported() {
        let root = init_repo(true);
        let git = GitCli::default();
        let sha = head_sha(&root, &git).await.expect("head sha");
        assert_eq!(sha.len(), 40);

        run_git(&root, &["checkout", "-q", "--detach", &sha]);
        assert_eq!(
            current_branch(&root, &git).await.expect("branch"),
            BranchHead::Detached
        );

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn upstream_and_counts_follow_remote_tracking_branch() {
        let parent = unique_temp_dir("upstream");
        let (clone, _remote) = clone_with_remote(&parent, "app");
        let git = GitCli::default();

        let tracked = upstream(&clone, "main", &git)
            .await
            .expect("query")
            .expect("main tracks origin/main");
        assert_eq!(tracked.remote, "origin");
        assert_eq!(tracked.branch, "main");

        commit_file(&clone, "a.txt", "a\n", "a");
        commit_file(&clone, "b.txt", "b\n", "b");
        let counts = ahead_behind(&clone, &tracked.tracking_ref(), &git)
            .await
            .expect("counts");
        assert_eq!(counts, (2, 0));

        run_git(&clone, &["checkout", "-q", "-b", "feat/y"]);
        assert!(upstream(&clone, "feat/y", &git).await.expect("query").is_none());

        let main = detect_main_branch(&clone, "app", "origin", &GitConfig::default(), &git)
            .await
            .expect("main branch");
        assert_eq!(main.name, "main");
        assert_eq!(main.reference.as_deref(), Some("origin/main"));

        let _ = fs::remove_dir_all(&parent);
    }

    #[tokio::test]
    async fn main_branch_override_wins() {
        let root = init_repo(true);
        run_git(&root, &["branch", "dev"]);
        let mut config = GitConfig::default();
        config
            .main_branch_overrides
            .insert("mono".to_string(), "dev".to_string());

        let git = GitCli::default();
        let main = detect_main_branch(&root, "monorepo-feat", "origin", &config, &git)
            .await
            .expect("main branch");
        assert_eq!(main.name, "dev");
        assert_eq!(main.reference.as_deref(), Some("dev"));

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn left_right_counts_parse_tab_separated_pair() {
        assert_eq!(parse_left_right_counts("3\t1\n").expect("parse"), (3, 1));
        assert!(parse_left_right_counts("3").is_err());
        assert!(parse_left_right_counts("x\t1").is_err());
    }
}
