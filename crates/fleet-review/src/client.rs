use std::path::{Path, PathBuf};

use fleet_core::config::ReviewConfig;
use fleet_core::types::{LocalStatus, PrStatus, RepoIdentity, Repository, ReviewRequest};
use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use crate::command::{AllowedReviewCommand, GhCli, PR_LIST_FIELDS, SEARCH_FIELDS, VIEW_FIELDS};
use crate::error::ReviewError;
use crate::types::{
    parse_pr_list_output, parse_search_output, parse_view_output, SearchedPr, ViewedPr,
};

/// Read and close operations against the review host, through `gh`.
#[derive(Debug, Clone)]
pub struct ReviewClient {
    cli: GhCli,
    workdir: PathBuf,
    search_limit: u32,
    lookups: usize,
}

impl ReviewClient {
    pub fn new(config: &ReviewConfig, lookups: usize) -> Self {
        Self::with_cli(
            GhCli::new(config.binary.clone(), config.timeout()),
            config.search_limit,
            lookups,
        )
    }

    pub fn with_cli(cli: GhCli, search_limit: u32, lookups: usize) -> Self {
        Self {
            cli,
            workdir: std::env::temp_dir(),
            search_limit: search_limit.max(1),
            lookups: lookups.max(1),
        }
    }

    /// Directory `gh` is started in. Every call names its repository
    /// explicitly, so this only needs to exist.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub async fn search_open(&self) -> Result<Vec<SearchedPr>, ReviewError> {
        let limit = self.search_limit.to_string();
        let output = self
            .cli
            .run_allowed(
                &self.workdir,
                AllowedReviewCommand::SearchOpenPrs,
                [
                    "search",
                    "prs",
                    "--author",
                    "@me",
                    "--state",
                    "open",
                    "--json",
                    SEARCH_FIELDS,
                    "--limit",
                    limit.as_str(),
                ],
            )
            .await?;
        parse_search_output(&output.stdout)
    }

    pub async fn view(&self, repo: &RepoIdentity, number: u64) -> Result<ViewedPr, ReviewError> {
        let number = number.to_string();
        let full_name = repo.full_name();
        let output = self
            .cli
            .run_allowed(
                &self.workdir,
                AllowedReviewCommand::ViewPr,
                [
                    "pr",
                    "view",
                    number.as_str(),
                    "--repo",
                    full_name.as_str(),
                    "--json",
                    VIEW_FIELDS,
                ],
            )
            .await?;
        parse_view_output(&output.stdout)
    }

    #[instrument(skip(self), fields(repo = %repo))]
    pub async fn close(&self, repo: &RepoIdentity, number: u64) -> Result<(), ReviewError> {
        let number = number.to_string();
        let full_name = repo.full_name();
        self.cli
            .run_allowed(
                &self.workdir,
                AllowedReviewCommand::ClosePr,
                ["pr", "close", number.as_str(), "--repo", full_name.as_str()],
            )
            .await?;
        Ok(())
    }

    /// Latest pull request with `branch` as its head. Runs inside
    /// `repo_root` so `gh` picks the repository from its remote.
    pub async fn pr_status(
        &self,
        repo_root: &Path,
        branch: &str,
    ) -> Result<PrStatus, ReviewError> {
        let output = self
            .cli
            .run_allowed(
                repo_root,
                AllowedReviewCommand::PrListByHead,
                [
                    "pr",
                    "list",
                    "--head",
                    branch,
                    "--state",
                    "all",
                    "--json",
                    PR_LIST_FIELDS,
                    "--limit",
                    "1",
                ],
            )
            .await?;
        parse_pr_list_output(&output.stdout)
    }

    /// Fills in `pr_status` for every tree. Detached trees and branches in
    /// `skip` or equal to the tree's main branch are not looked up. A failed
    /// lookup marks only that tree `Unknown`.
    #[instrument(skip_all, fields(repositories = repos.len()))]
    pub async fn annotate_pr_status(
        &self,
        repos: Vec<Repository>,
        skip: &[String],
    ) -> Vec<Repository> {
        stream::iter(repos)
            .map(|repo| async move {
                let status = match lookup_branch(&repo, skip) {
                    Lookup::Skip => PrStatus::NotApplicable,
                    Lookup::Unknown => PrStatus::Unknown,
                    Lookup::Branch(branch) => match self.pr_status(&repo.root, branch).await {
                        Ok(status) => status,
                        Err(err) => {
                            warn!(
                                root = %repo.root.display(),
                                branch,
                                error = %err,
                                "pull request lookup failed"
                            );
                            PrStatus::Unknown
                        }
                    },
                };
                repo.with_pr_status(status)
            })
            .buffered(self.lookups)
            .collect()
            .await
    }

    /// Open review requests authored by the current user, head branches
    /// resolved. Local status is left `NotCloned` for the matcher to fill in.
    /// Requests that are no longer open when viewed are dropped.
    #[instrument(skip_all)]
    pub async fn list_open(&self) -> Result<Vec<ReviewRequest>, ReviewError> {
        let rows = self
            .search_open()
            .await?
            .into_iter()
            .filter(|row| row.state.as_deref().map_or(true, |state| state.eq_ignore_ascii_case("open")))
            .filter_map(|row| match row.identity() {
                Some(identity) => Some((identity, row)),
                None => {
                    warn!(repository = %row.repository.name_with_owner, "skipping review request with unparseable repository");
                    None
                }
            })
            .collect::<Vec<_>>();
        debug!(count = rows.len(), "resolving head branches");

        let resolved = stream::iter(rows)
            .map(|(identity, row)| async move {
                let viewed = self.view(&identity, row.number).await;
                (identity, row, viewed)
            })
            .buffered(self.lookups)
            .collect::<Vec<_>>()
            .await;

        let mut requests = Vec::with_capacity(resolved.len());
        for (identity, row, viewed) in resolved {
            let head_branch = match viewed {
                Ok(viewed) if !viewed.is_open() => {
                    debug!(number = row.number, state = %viewed.state, "dropping closed review request");
                    continue;
                }
                Ok(viewed) => viewed.head_ref_name,
                Err(err) if err.is_authentication_required() => return Err(err),
                Err(err) => {
                    warn!(number = row.number, repo = %identity, error = %err, "could not resolve head branch");
                    String::new()
                }
            };
            requests.push(ReviewRequest {
                repo_url: row.repo_url(),
                repo: identity,
                number: row.number,
                title: row.title,
                head_branch,
                url: row.url,
                local_status: LocalStatus::NotCloned,
            });
        }
        Ok(requests)
    }
}

enum Lookup<'a> {
    Skip,
    Unknown,
    Branch(&'a str),
}

fn lookup_branch<'a>(repo: &'a Repository, skip: &[String]) -> Lookup<'a> {
    if let Some(state) = &repo.state {
        if state.branch.is_detached() || state.branch.name() == state.main_branch {
            return Lookup::Skip;
        }
    }
    match repo.checked_out_branch() {
        Some(branch) if skip.iter().any(|skipped| skipped == branch) => Lookup::Skip,
        Some(branch) => Lookup::Branch(branch),
        None => Lookup::Unknown,
    }
}
