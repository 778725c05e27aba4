//! Whether an action makes sense for a target in its current state.
//!
//! These rules only advise: the orchestrator consults them when asked to skip
//! ineligible targets, and otherwise runs whatever it is given.

use crate::action::{ActionKind, Target, TargetKind};
use crate::config::GitConfig;
use crate::types::{LocalStatus, Repository, ReviewRequest, SyncState};

/// Reason `action` should not run against `target`, or `None` when it may.
pub fn why_not(action: ActionKind, target: &Target, git: &GitConfig) -> Option<String> {
    match (action.target_kind(), target) {
        (TargetKind::Repository, Target::Repository(repo)) => why_not_repository(action, repo, git),
        (TargetKind::ReviewRequest, Target::ReviewRequest(pr)) => why_not_review(action, pr),
        (TargetKind::Repository, Target::ReviewRequest(_)) => {
            Some(format!("{action} applies to repositories, not pull requests"))
        }
        (TargetKind::ReviewRequest, Target::Repository(_)) => {
            Some(format!("{action} applies to pull requests, not repositories"))
        }
    }
}

pub fn why_not_repository(action: ActionKind, repo: &Repository, git: &GitConfig) -> Option<String> {
    if repo.error.is_some() {
        return Some("state unknown (last refresh failed)".to_string());
    }
    let Some(state) = repo.state.as_ref() else {
        return Some("state unknown (not classified yet)".to_string());
    };
    let has_upstream = state.upstream.is_some();
    let on_main = state.branch.name() == state.main_branch || git.is_protected(state.branch.name());

    match action {
        ActionKind::Fetch => None,
        ActionKind::Pull => {
            if !has_upstream {
                Some("no upstream branch".to_string())
            } else if state.sync == SyncState::Diverged {
                Some("diverged (use rebase or force push)".to_string())
            } else if state.sync != SyncState::Behind {
                Some("already up to date".to_string())
            } else if state.dirty {
                Some("has uncommitted changes".to_string())
            } else {
                None
            }
        }
        ActionKind::Rebase => {
            if state.branch.is_detached() {
                Some("detached HEAD".to_string())
            } else if on_main {
                Some("on main branch".to_string())
            } else if state.dirty {
                Some("has uncommitted changes".to_string())
            } else if !state.needs_rebase {
                Some("already rebased".to_string())
            } else {
                None
            }
        }
        ActionKind::ForcePush => {
            if !has_upstream {
                Some("no upstream branch".to_string())
            } else if git.is_protected(state.branch.name()) {
                Some("protected branch".to_string())
            } else if !matches!(state.sync, SyncState::Ahead | SyncState::Diverged) {
                Some("nothing to push".to_string())
            } else {
                None
            }
        }
        ActionKind::CreateRemoteBranch => {
            if state.branch.is_detached() {
                Some("detached HEAD".to_string())
            } else if has_upstream {
                Some("upstream already exists".to_string())
            } else {
                None
            }
        }
        ActionKind::Stash => (!state.dirty).then(|| "no changes to stash".to_string()),
        ActionKind::Discard => (!state.dirty).then(|| "no changes to discard".to_string()),
        ActionKind::ResetToRemote => {
            (!has_upstream).then(|| "no upstream branch to reset to".to_string())
        }
        ActionKind::DeleteLocalFolder => {
            if !has_upstream {
                Some("no upstream branch (local work would be lost)".to_string())
            } else if state.dirty {
                Some("has uncommitted changes".to_string())
            } else if state.sync != SyncState::InSync {
                Some(format!("not in sync with upstream ({})", state.sync_label()))
            } else {
                None
            }
        }
        ActionKind::CheckoutPrToWorktree | ActionKind::OpenInBrowser | ActionKind::ClosePr => {
            Some(format!("{action} applies to pull requests, not repositories"))
        }
    }
}

pub fn why_not_review(action: ActionKind, pr: &ReviewRequest) -> Option<String> {
    match action {
        ActionKind::CheckoutPrToWorktree => match &pr.local_status {
            LocalStatus::CheckedOut { path } => {
                Some(format!("already checked out at {}", path.display()))
            }
            _ if pr.head_branch.trim().is_empty() => Some("head branch unknown".to_string()),
            _ => None,
        },
        ActionKind::OpenInBrowser => pr.url.trim().is_empty().then(|| "no URL".to_string()),
        ActionKind::ClosePr => None,
        other => Some(format!("{other} applies to repositories, not pull requests")),
    }
}
