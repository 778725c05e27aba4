//! Cross-references open review requests with the local inventory.

use fleet_core::inventory::Inventory;
use fleet_core::types::{LocalStatus, RepoIdentity, RepoKind, Repository, ReviewRequest};
use tracing::{info, instrument};

use crate::client::ReviewClient;
use crate::error::ReviewError;

#[derive(Debug, Clone)]
pub struct Matcher {
    client: ReviewClient,
}

impl Matcher {
    pub fn new(client: ReviewClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ReviewClient {
        &self.client
    }

    #[instrument(skip_all, fields(repositories = inventory.len()))]
    pub async fn match_all(&self, inventory: &Inventory) -> Result<Vec<ReviewRequest>, ReviewError> {
        let requests = self.client.list_open().await?;
        let matched = match_local_status(requests, inventory);
        info!(count = matched.len(), "matched open review requests");
        Ok(matched)
    }
}

pub fn match_local_status(requests: Vec<ReviewRequest>, inventory: &Inventory) -> Vec<ReviewRequest> {
    requests
        .into_iter()
        .map(|mut request| {
            request.local_status = local_status(&request.repo, &request.head_branch, inventory);
            request
        })
        .collect()
}

/// Checked out anywhere wins over merely cloned. Among clones the primary is
/// preferred. An unclassified tree counts by the branch its worktree listing
/// reported.
pub fn local_status(identity: &RepoIdentity, head_branch: &str, inventory: &Inventory) -> LocalStatus {
    let candidates = inventory
        .iter()
        .filter(|repo| belongs_to(repo, identity, inventory))
        .collect::<Vec<_>>();

    if !head_branch.is_empty() {
        if let Some(repo) = candidates
            .iter()
            .find(|repo| repo.checked_out_branch() == Some(head_branch))
        {
            return LocalStatus::CheckedOut {
                path: repo.root.clone(),
            };
        }
    }

    candidates
        .iter()
        .find(|repo| repo.kind == RepoKind::Primary)
        .or_else(|| candidates.first())
        .map(|repo| LocalStatus::Available {
            path: repo.root.clone(),
        })
        .unwrap_or(LocalStatus::NotCloned)
}

/// Identity from the classified remote, the primary's remote for an
/// unclassified worktree, or else the primary's directory name.
fn belongs_to(repo: &Repository, identity: &RepoIdentity, inventory: &Inventory) -> bool {
    let known = repo.identity().or_else(|| {
        inventory
            .find_by_path(repo.primary_root())
            .and_then(Repository::identity)
    });
    match known {
        Some(known) => known.same_as(identity),
        None => repo
            .primary_root()
            .file_name()
            .is_some_and(|name| name.to_string_lossy().eq_ignore_ascii_case(&identity.name)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use fleet_core::inventory::Inventory;
    use fleet_core::types::{
        BranchHead, LocalStatus, RepoIdentity, RepoState, Repository, SyncState,
    };
    use fleet_git::ScriptedGateway;

    use super::{local_status, Matcher};
    use crate::client::test_support::{search_args, search_row, view_args, view_body};
    use crate::client::ReviewClient;
    use crate::command::GhCli;

    fn state(branch: &str, identity: Option<RepoIdentity>) -> RepoState {
        RepoState {
            branch: BranchHead::Named(branch.to_string()),
            upstream: None,
            identity,
            dirty: false,
            ahead: 0,
            behind: 0,
            sync: SyncState::LocalOnly,
            main_branch: "main".to_string(),
            behind_main: 0,
            needs_rebase: false,
        }
    }

    fn org_app() -> RepoIdentity {
        RepoIdentity::new("org", "app")
    }

    fn fleet() -> Inventory {
        let primary = PathBuf::from("/work/app");
        Inventory::new(vec![
            Repository::primary(&primary).with_state(state("main", Some(org_app()))),
            Repository::worktree("/work/app-fix-bug-123", &primary)
                .with_state(state("fix/bug-123", Some(org_app()))),
            Repository::primary("/work/tool").with_state(state("main", None)),
        ])
    }

    #[test]
    fn checked_out_when_a_tree_has_the_head_branch() {
        assert_eq!(
            local_status(&org_app(), "fix/bug-123", &fleet()),
            LocalStatus::CheckedOut {
                path: PathBuf::from("/work/app-fix-bug-123")
            }
        );
    }

    #[test]
    fn available_prefers_the_primary() {
        assert_eq!(
            local_status(&RepoIdentity::new("ORG", "App"), "feat/other", &fleet()),
            LocalStatus::Available {
                path: PathBuf::from("/work/app")
            }
        );
    }

    #[test]
    fn not_cloned_when_identity_is_absent() {
        assert_eq!(
            local_status(&org_app(), "fix/bug-123", &Inventory::default()),
            LocalStatus::NotCloned
        );
        assert_eq!(
            local_status(&RepoIdentity::new("org", "web"), "main", &fleet()),
            LocalStatus::NotCloned
        );
    }

    #[test]
    fn falls_back_to_directory_name_without_a_remote() {
        assert_eq!(
            local_status(&RepoIdentity::new("someone", "tool"), "main", &fleet()),
            LocalStatus::CheckedOut {
                path: PathBuf::from("/work/tool")
            }
        );
    }

    #[test]
    fn unclassified_worktree_inherits_primary_identity() {
        let primary = PathBuf::from("/work/app");
        let inventory = Inventory::new(vec![
            Repository::primary(&primary).with_state(state("main", Some(org_app()))),
            Repository::worktree("/work/app-wip", &primary),
        ]);
        assert_eq!(
            local_status(&org_app(), "wip", &inventory),
            LocalStatus::Available {
                path: primary.clone()
            }
        );
    }

    #[test]
    fn unclassified_worktree_counts_by_its_listed_branch() {
        let primary = PathBuf::from("/work/app");
        let inventory = Inventory::new(vec![
            Repository::primary(&primary).with_state(state("main", Some(org_app()))),
            Repository::worktree("/work/app-fix-bug-123", &primary)
                .with_listed_branch(Some("fix/bug-123".to_string()))
                .with_error("git timed out"),
        ]);
        assert_eq!(
            local_status(&org_app(), "fix/bug-123", &inventory),
            LocalStatus::CheckedOut {
                path: PathBuf::from("/work/app-fix-bug-123")
            }
        );
    }

    #[tokio::test]
    async fn match_all_annotates_each_request() {
        let search = format!(
            "[{},{}]",
            search_row(42, "org/app", "Fix bug"),
            search_row(5, "org/web", "New page")
        );
        let gateway = ScriptedGateway::new()
            .ok(&search_args(20), &search)
            .ok(&view_args(42, "org/app"), &view_body(42, "fix/bug-123", "OPEN"))
            .ok(&view_args(5, "org/web"), &view_body(5, "feat/page", "OPEN"));
        let matcher = Matcher::new(ReviewClient::with_cli(
            GhCli::with_gateway(Arc::new(gateway)),
            20,
            4,
        ));

        let matched = matcher.match_all(&fleet()).await.expect("match");
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].local_status.as_str(), "checked-out");
        assert_eq!(matched[1].local_status, LocalStatus::NotCloned);
    }
}
