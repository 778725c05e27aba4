//! One recipe per action. Each returns a one-line detail on success.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fleet_core::action::{ActionKind, Target, TargetKind};
use fleet_core::types::{
    BranchHead, LocalStatus, RepoKind, Repository, ReviewRequest, WorktreeMapping, DETACHED_BRANCH,
};
use fleet_git::{
    current_branch, detect_main_branch, discover_repo, upstream, CreateOptions, GitError,
    MainBranch, RemoveOptions, WorktreeError, WriteGuards,
};
use tracing::{debug, info, warn};

use crate::context::OpsContext;
use crate::error::{looks_like_rebase_conflict, OpsError};

pub async fn run_recipe(
    ctx: &OpsContext,
    action: ActionKind,
    target: &Target,
) -> Result<String, OpsError> {
    match action {
        ActionKind::Fetch => fetch(ctx, repository(action, target)?).await,
        ActionKind::Pull => pull(ctx, repository(action, target)?).await,
        ActionKind::Rebase => rebase(ctx, repository(action, target)?).await,
        ActionKind::ForcePush => force_push(ctx, repository(action, target)?).await,
        ActionKind::CreateRemoteBranch => {
            create_remote_branch(ctx, repository(action, target)?).await
        }
        ActionKind::Stash => stash(ctx, repository(action, target)?).await,
        ActionKind::Discard => discard(ctx, repository(action, target)?).await,
        ActionKind::ResetToRemote => reset_to_remote(ctx, repository(action, target)?).await,
        ActionKind::DeleteLocalFolder => {
            delete_local_folder(ctx, repository(action, target)?).await
        }
        ActionKind::CheckoutPrToWorktree => {
            checkout_pr(ctx, review_request(action, target)?).await
        }
        ActionKind::OpenInBrowser => open_in_browser(ctx, review_request(action, target)?),
        ActionKind::ClosePr => close_pr(ctx, review_request(action, target)?).await,
    }
}

fn repository(action: ActionKind, target: &Target) -> Result<&Repository, OpsError> {
    match target {
        Target::Repository(repo) => Ok(repo),
        Target::ReviewRequest(_) => Err(OpsError::WrongTarget {
            action,
            expected: TargetKind::Repository,
        }),
    }
}

fn review_request(action: ActionKind, target: &Target) -> Result<&ReviewRequest, OpsError> {
    match target {
        Target::ReviewRequest(pr) => Ok(pr),
        Target::Repository(_) => Err(OpsError::WrongTarget {
            action,
            expected: TargetKind::ReviewRequest,
        }),
    }
}

/// Exclusive locks on the tree and, for a linked worktree, on the primary
/// whose object store the command writes to.
async fn lock_tree(ctx: &OpsContext, repo: &Repository) -> Result<WriteGuards, OpsError> {
    if !repo.root.is_dir() {
        return Err(OpsError::RepoNotFound {
            path: repo.root.clone(),
        });
    }
    Ok(ctx
        .locks()
        .write_many([repo.root.as_path(), repo.primary_root()])
        .await)
}

async fn named_branch(ctx: &OpsContext, root: &Path) -> Result<String, OpsError> {
    match current_branch(root, ctx.git()).await? {
        BranchHead::Named(name) => Ok(name),
        BranchHead::Detached => Err(OpsError::DetachedHead {
            path: root.to_path_buf(),
        }),
    }
}

fn summary_line(stdout: &str, fallback: &str) -> String {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or(fallback)
        .to_string()
}

async fn fetch(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    ctx.git()
        .run(&repo.root, ["fetch", "--all", "--prune"])
        .await?;
    Ok("fetched all remotes".to_string())
}

async fn pull(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    let output = ctx.git().run(&repo.root, ["pull", "--ff-only"]).await?;
    Ok(summary_line(&output.stdout, "pulled"))
}

async fn rebase(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    let remote = ctx.remote();

    let fetched = ctx
        .git()
        .run_raw(&repo.root, ["fetch", "--prune", remote])
        .await?;
    if !fetched.success() {
        debug!(stderr = %fetched.stderr.trim(), "fetch before rebase failed; using local refs");
    }

    let repo_name = repo
        .primary_root()
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let MainBranch { name, reference } =
        detect_main_branch(&repo.root, &repo_name, remote, ctx.git_config(), ctx.git()).await?;
    let onto = reference.ok_or(OpsError::NoMainBranch { name })?;

    let output = ctx
        .git()
        .run_raw(&repo.root, ["rebase", onto.as_str()])
        .await?;
    if output.success() {
        info!(root = %repo.root.display(), onto = %onto, "rebased");
        return Ok(format!("rebased onto {onto}"));
    }

    if looks_like_rebase_conflict(&output.stdout, &output.stderr) {
        let aborted = ctx.git().run_raw(&repo.root, ["rebase", "--abort"]).await?;
        if !aborted.success() {
            warn!(root = %repo.root.display(), stderr = %aborted.stderr.trim(), "rebase --abort failed");
        }
        return Err(OpsError::Conflict {
            detail: conflict_detail(&output.stdout, &output.stderr),
            onto,
        });
    }

    Err(GitError::CommandFailed {
        command: output.command,
        status: output.status,
        stdout: output.stdout,
        stderr: output.stderr,
    }
    .into())
}

fn conflict_detail(stdout: &str, stderr: &str) -> String {
    let conflicts = stdout
        .lines()
        .chain(stderr.lines())
        .map(str::trim)
        .filter(|line| line.starts_with("CONFLICT"))
        .collect::<Vec<_>>();
    if conflicts.is_empty() {
        stderr.trim().to_string()
    } else {
        conflicts.join("; ")
    }
}

async fn force_push(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    let branch = named_branch(ctx, &repo.root).await?;
    let tracking = upstream(&repo.root, &branch, ctx.git())
        .await?
        .ok_or_else(|| OpsError::NoUpstream {
            branch: branch.clone(),
        })?;

    let refspec = format!("{branch}:{}", tracking.branch);
    ctx.git()
        .run(
            &repo.root,
            [
                "push",
                "--force-with-lease",
                tracking.remote.as_str(),
                refspec.as_str(),
            ],
        )
        .await?;
    Ok(format!("force-pushed {branch} to {tracking}"))
}

async fn create_remote_branch(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    let branch = named_branch(ctx, &repo.root).await?;
    let remote = ctx.remote();
    ctx.git()
        .run(&repo.root, ["push", "-u", remote, branch.as_str()])
        .await?;
    Ok(format!("pushed {branch} to {remote} with upstream"))
}

async fn stash(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    let message = format!("fleet stash {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
    let output = ctx
        .git()
        .run(
            &repo.root,
            ["stash", "push", "--include-untracked", "-m", message.as_str()],
        )
        .await?;
    Ok(summary_line(&output.stdout, "stashed"))
}

async fn discard(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    ctx.git().run(&repo.root, ["reset", "--hard", "HEAD"]).await?;
    ctx.git().run(&repo.root, ["clean", "-fd"]).await?;
    Ok("discarded local changes".to_string())
}

async fn reset_to_remote(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    let _guards = lock_tree(ctx, repo).await?;
    let branch = named_branch(ctx, &repo.root).await?;
    let tracking = upstream(&repo.root, &branch, ctx.git())
        .await?
        .ok_or_else(|| OpsError::NoUpstream {
            branch: branch.clone(),
        })?;

    ctx.git()
        .run(&repo.root, ["fetch", "--prune", tracking.remote.as_str()])
        .await?;
    let tracking_ref = tracking.tracking_ref();
    ctx.git()
        .run(&repo.root, ["reset", "--hard", tracking_ref.as_str()])
        .await?;
    ctx.git().run(&repo.root, ["clean", "-fd"]).await?;
    Ok(format!("reset to {tracking_ref}"))
}

/// A linked worktree is deregistered through its primary; anything else is
/// removed from disk. The worktree manager takes its own locks.
async fn delete_local_folder(ctx: &OpsContext, repo: &Repository) -> Result<String, OpsError> {
    if !repo.root.exists() {
        return Err(OpsError::RepoNotFound {
            path: repo.root.clone(),
        });
    }

    match &repo.kind {
        RepoKind::Worktree { primary } => {
            let mapping = WorktreeMapping {
                primary_root: primary.clone(),
                branch: repo.branch().unwrap_or(DETACHED_BRANCH).to_string(),
                path: repo.root.clone(),
            };
            ctx.worktrees()
                .remove_worktree(&mapping, RemoveOptions { force: true })
                .await?;
            Ok(format!("removed worktree {}", repo.root.display()))
        }
        RepoKind::Primary => {
            let _guard = ctx.locks().write(&repo.root).await;
            tokio::fs::remove_dir_all(&repo.root)
                .await
                .map_err(|source| OpsError::from_io(&repo.root, source))?;
            info!(root = %repo.root.display(), "deleted repository folder");
            Ok(format!("deleted {}", repo.root.display()))
        }
    }
}

async fn checkout_pr(ctx: &OpsContext, pr: &ReviewRequest) -> Result<String, OpsError> {
    let branch = pr.head_branch.trim();
    if branch.is_empty() {
        return Err(OpsError::MissingHeadBranch {
            reference: pr.reference(),
        });
    }

    let primary = match &pr.local_status {
        LocalStatus::CheckedOut { path } => {
            return Ok(format!("already checked out at {}", path.display()));
        }
        LocalStatus::Available { path } => discover_repo(path, ctx.git()).await?.primary_root(),
        LocalStatus::NotCloned => clone_repository(ctx, pr).await?,
    };

    // One exclusive hold on the primary covers both fetches and the
    // worktree registration.
    let _guard = ctx.locks().write(&primary).await;
    let remote = ctx.remote();
    let fetched = ctx
        .git()
        .run_raw(&primary, ["fetch", "--prune", remote])
        .await?;
    if !fetched.success() {
        warn!(primary = %primary.display(), stderr = %fetched.stderr.trim(), "fetch before checkout failed");
    }

    let worktrees = ctx.worktrees();
    let mapping = match worktrees
        .create_worktree_unlocked(&primary, branch, CreateOptions::default())
        .await
    {
        Err(WorktreeError::BranchNotFound { .. }) => {
            // Heads from forks are only reachable through the pull ref.
            let refspec = format!("pull/{}/head:{branch}", pr.number);
            ctx.git()
                .run(&primary, ["fetch", remote, refspec.as_str()])
                .await?;
            worktrees
                .create_worktree_unlocked(&primary, branch, CreateOptions::default())
                .await?
        }
        other => other?,
    };
    Ok(format!("{branch} checked out at {}", mapping.path.display()))
}

/// `https://<host>/<owner>/<name>.git` first, then the SSH form.
pub fn clone_urls(pr: &ReviewRequest) -> Vec<String> {
    let full_name = pr.repo.full_name();
    let web = pr.repo_url.trim().trim_end_matches('/');
    let web = web.strip_suffix(".git").unwrap_or(web);
    let https = if web.starts_with("https://") {
        format!("{web}.git")
    } else {
        format!("https://github.com/{full_name}.git")
    };
    let host = https
        .trim_start_matches("https://")
        .split('/')
        .next()
        .filter(|host| !host.is_empty())
        .unwrap_or("github.com")
        .to_string();
    vec![https, format!("git@{host}:{full_name}.git")]
}

/// Clones into `<scan root>/<name>`, reusing a clone already there.
async fn clone_repository(ctx: &OpsContext, pr: &ReviewRequest) -> Result<PathBuf, OpsError> {
    let destination = ctx.scan_root().join(&pr.repo.name);
    let _guard = ctx.locks().write(&destination).await;
    if destination.join(".git").is_dir() {
        debug!(path = %destination.display(), "reusing existing clone");
        return Ok(destination);
    }
    if destination.exists() {
        return Err(OpsError::DestinationExists { path: destination });
    }

    let mut failures = Vec::new();
    for url in clone_urls(pr) {
        let args: Vec<OsString> = vec![
            "clone".into(),
            OsString::from(&url),
            destination.clone().into_os_string(),
        ];
        let output = ctx.git().run_raw(ctx.scan_root(), args).await?;
        if output.success() {
            info!(url = %url, path = %destination.display(), "cloned repository");
            return Ok(destination);
        }
        debug!(url = %url, stderr = %output.stderr.trim(), "clone attempt failed");
        failures.push(format!("{url}: {}", output.stderr.trim()));
    }
    Err(OpsError::CloneFailed {
        repo: pr.repo.full_name(),
        detail: failures.join("; "),
    })
}

fn open_in_browser(ctx: &OpsContext, pr: &ReviewRequest) -> Result<String, OpsError> {
    ctx.browser()
        .open(&pr.url)
        .map_err(|source| OpsError::Browser {
            url: pr.url.clone(),
            source,
        })?;
    Ok(format!("opened {}", pr.url))
}

async fn close_pr(ctx: &OpsContext, pr: &ReviewRequest) -> Result<String, OpsError> {
    ctx.review().close(&pr.repo, pr.number).await?;
    Ok(format!("closed {}", pr.reference()))
}
