//! Wires the configured git, review and ops layers together for one scan
//! root, and turns command-line selectors into bulk targets.

use std::path::{Path, PathBuf};

use fleet_core::action::Target;
use fleet_core::config::FleetConfig;
use fleet_core::inventory::Inventory;
use fleet_core::types::{RepoIdentity, Repository, ReviewRequest};
use fleet_git::{
    discover_repo, Classifier, Discoverer, FeatureAllocator, GitCli, GitError, PathLocks,
    ScanError, WorktreeManager,
};
use fleet_ops::{BulkOrchestrator, OpsContext};
use fleet_review::{Matcher, ReviewClient, ReviewError};
use tracing::{info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error("no repository matches '{selector}'")]
    UnknownRepository { selector: String },
    #[error("no open pull request matches '{selector}'")]
    UnknownReviewRequest { selector: String },
    #[error("'{selector}' matches more than one pull request: {candidates}")]
    AmbiguousReviewRequest { selector: String, candidates: String },
    #[error("no targets given; name some or pass --all")]
    NoTargets,
    #[error("failed to read the current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub inventory: Inventory,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FleetService {
    config: FleetConfig,
    scan_root: PathBuf,
    git: GitCli,
    locks: PathLocks,
}

impl FleetService {
    pub fn new(config: FleetConfig, scan_root: impl Into<PathBuf>) -> Self {
        let git = GitCli::new(config.git.binary.clone(), config.git.timeout());
        Self {
            config,
            scan_root: scan_root.into(),
            git,
            locks: PathLocks::new(),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn scan_root(&self) -> &Path {
        &self.scan_root
    }

    /// Discovers every working tree under the scan root and classifies it.
    #[instrument(skip_all, fields(root = %self.scan_root.display()))]
    pub async fn scan(&self) -> Result<ScanOutcome, ServiceError> {
        let report = Discoverer::new(
            self.git.clone(),
            self.config.scan.clone(),
            self.config.concurrency.classify,
        )
        .scan(&self.scan_root)
        .await?;
        let warnings = report.warnings.clone();

        let mut inventory = report.into_inventory();
        Classifier::new(self.git.clone(), self.config.git.clone(), self.locks.clone())
            .refresh(&mut inventory, self.config.concurrency.classify)
            .await;

        info!(repositories = inventory.len(), warnings = warnings.len(), "scan finished");
        Ok(ScanOutcome { inventory, warnings })
    }

    /// Records each tree's pull request state. Protected branches are not
    /// looked up.
    pub async fn annotate_pr_status(&self, inventory: &mut Inventory) {
        let repos = std::mem::take(inventory).into_vec();
        let annotated = self
            .review_client()
            .annotate_pr_status(repos, &self.config.git.protected_branches)
            .await;
        *inventory = Inventory::new(annotated);
    }

    /// Open pull requests authored by the signed-in user, matched against
    /// the local inventory.
    pub async fn review_requests(
        &self,
        inventory: &Inventory,
    ) -> Result<Vec<ReviewRequest>, ServiceError> {
        Ok(Matcher::new(self.review_client()).match_all(inventory).await?)
    }

    fn review_client(&self) -> ReviewClient {
        ReviewClient::new(&self.config.review, self.config.concurrency.remote_lookups)
            .with_workdir(self.scan_root.clone())
    }

    pub fn orchestrator(&self) -> BulkOrchestrator {
        let context = OpsContext::new(&self.config, self.scan_root.clone(), self.locks.clone());
        BulkOrchestrator::new(context, self.config.concurrency.bulk)
    }

    pub fn worktrees(&self) -> WorktreeManager {
        WorktreeManager::new(
            self.git.clone(),
            self.config.git.default_remote.clone(),
            self.locks.clone(),
        )
    }

    pub fn features(&self) -> FeatureAllocator {
        FeatureAllocator::new(
            self.worktrees(),
            self.config.git.default_remote.clone(),
            self.config.feature.clone(),
        )
    }

    /// Primary root for a `--repo` selector. An existing path is asked
    /// directly; a bare name is looked up in a fresh scan; no selector means
    /// the current directory.
    pub async fn resolve_primary(&self, selector: Option<&str>) -> Result<PathBuf, ServiceError> {
        let path = match selector {
            None => std::env::current_dir().map_err(ServiceError::CurrentDir)?,
            Some(selector) if Path::new(selector).exists() => PathBuf::from(selector),
            Some(selector) => {
                let scanned = self.scan().await?;
                return scanned
                    .inventory
                    .find(selector)
                    .map(|repo| repo.primary_root().to_path_buf())
                    .ok_or_else(|| ServiceError::UnknownRepository {
                        selector: selector.to_string(),
                    });
            }
        };
        Ok(discover_repo(&path, &self.git).await?.primary_root())
    }
}

/// Repository targets for `selectors`, in the order given. `all` takes every
/// tree in the inventory.
pub fn resolve_repositories(
    inventory: &Inventory,
    selectors: &[String],
    all: bool,
) -> Result<Vec<Target>, ServiceError> {
    if all {
        return Ok(inventory.iter().cloned().map(Target::from).collect());
    }
    if selectors.is_empty() {
        return Err(ServiceError::NoTargets);
    }

    selectors
        .iter()
        .map(|selector| {
            find_repository(inventory, selector)
                .map(|repo| Target::from(repo.clone()))
                .ok_or_else(|| ServiceError::UnknownRepository {
                    selector: selector.clone(),
                })
        })
        .collect()
}

fn find_repository<'a>(inventory: &'a Inventory, selector: &str) -> Option<&'a Repository> {
    inventory.find(selector).or_else(|| {
        let canonical = std::fs::canonicalize(selector).ok()?;
        inventory.find_by_path(&canonical)
    })
}

/// Pull request targets. A selector is `owner/name#N`, or a bare `N` / `#N`
/// when only one open pull request carries that number.
pub fn resolve_review_requests(
    requests: &[ReviewRequest],
    selectors: &[String],
    all: bool,
) -> Result<Vec<Target>, ServiceError> {
    if all {
        return Ok(requests.iter().cloned().map(Target::from).collect());
    }
    if selectors.is_empty() {
        return Err(ServiceError::NoTargets);
    }

    selectors
        .iter()
        .map(|selector| find_review_request(requests, selector).map(|pr| Target::from(pr.clone())))
        .collect()
}

fn find_review_request<'a>(
    requests: &'a [ReviewRequest],
    selector: &str,
) -> Result<&'a ReviewRequest, ServiceError> {
    let unknown = || ServiceError::UnknownReviewRequest {
        selector: selector.to_string(),
    };
    let trimmed = selector.trim();

    if let Some((repo, number)) = trimmed.rsplit_once('#').filter(|(repo, _)| !repo.is_empty()) {
        let identity = RepoIdentity::parse_full_name(repo).ok_or_else(unknown)?;
        let number = number.parse::<u64>().map_err(|_| unknown())?;
        return requests
            .iter()
            .find(|pr| pr.number == number && pr.repo.same_as(&identity))
            .ok_or_else(unknown);
    }

    let number = trimmed
        .trim_start_matches('#')
        .parse::<u64>()
        .map_err(|_| unknown())?;
    let matches = requests
        .iter()
        .filter(|pr| pr.number == number)
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [] => Err(unknown()),
        [single] => Ok(*single),
        many => Err(ServiceError::AmbiguousReviewRequest {
            selector: selector.to_string(),
            candidates: many
                .iter()
                .map(|pr| pr.reference())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::process::Command;

    use fleet_core::action::Target;
    use fleet_core::config::FleetConfig;
    use fleet_core::inventory::Inventory;
    use fleet_core::types::{LocalStatus, RepoIdentity, Repository, ReviewRequest};

    use super::{resolve_repositories, resolve_review_requests, FleetService, ServiceError};

    fn pr(owner: &str, name: &str, number: u64) -> ReviewRequest {
        ReviewRequest {
            repo: RepoIdentity::new(owner, name),
            number,
            title: format!("PR {number}"),
            head_branch: format!("feat/{number}"),
            repo_url: format!("https://github.com/{owner}/{name}"),
            url: format!("https://github.com/{owner}/{name}/pull/{number}"),
            local_status: LocalStatus::NotCloned,
        }
    }

    fn labels(targets: &[Target]) -> Vec<String> {
        targets.iter().map(Target::label).collect()
    }

    #[test]
    fn repositories_resolve_by_name_in_given_order() {
        let inventory = Inventory::new(vec![
            Repository::primary("/work/app"),
            Repository::primary("/work/lib"),
        ]);
        let targets =
            resolve_repositories(&inventory, &["lib".to_string(), "/work/app".to_string()], false)
                .expect("resolve");
        assert_eq!(labels(&targets), vec!["lib", "app"]);

        let all = resolve_repositories(&inventory, &[], true).expect("all");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn unknown_repository_and_empty_selection_are_errors() {
        let inventory = Inventory::new(vec![Repository::primary("/work/app")]);
        assert!(matches!(
            resolve_repositories(&inventory, &["nope".to_string()], false),
            Err(ServiceError::UnknownRepository { selector }) if selector == "nope"
        ));
        assert!(matches!(
            resolve_repositories(&inventory, &[], false),
            Err(ServiceError::NoTargets)
        ));
    }

    #[test]
    fn review_requests_resolve_by_reference_or_unique_number() {
        let requests = vec![pr("org", "app", 42), pr("org", "lib", 7)];
        let targets = resolve_review_requests(
            &requests,
            &["Org/App#42".to_string(), "#7".to_string()],
            false,
        )
        .expect("resolve");
        assert_eq!(labels(&targets), vec!["org/app#42", "org/lib#7"]);
    }

    #[test]
    fn ambiguous_pr_number_lists_candidates() {
        let requests = vec![pr("org", "app", 5), pr("org", "lib", 5)];
        let err = resolve_review_requests(&requests, &["5".to_string()], false)
            .expect_err("ambiguous");
        assert_eq!(
            err.to_string(),
            "'5' matches more than one pull request: org/app#5, org/lib#5"
        );
        assert!(matches!(
            resolve_review_requests(&requests, &["org/app#9".to_string()], false),
            Err(ServiceError::UnknownReviewRequest { .. })
        ));
    }

    fn git(cwd: &std::path::Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .status()
            .expect("spawn git");
        assert!(status.success(), "git {args:?} failed");
    }

    fn init_repo(root: &std::path::Path) {
        std::fs::create_dir_all(root).expect("mkdir");
        git(root, &["init", "-q", "-b", "main"]);
        git(root, &["config", "user.email", "fleet@example.com"]);
        git(root, &["config", "user.name", "Fleet Test"]);
        std::fs::write(root.join("README.md"), "hello\n").expect("write");
        git(root, &["add", "."]);
        git(root, &["commit", "-q", "-m", "init"]);
    }

    #[tokio::test]
    async fn scan_classifies_discovered_trees() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(dir.path()).expect("canonical");
        init_repo(&root.join("app"));
        std::fs::write(root.join("app").join("scratch.txt"), "wip\n").expect("dirty");

        let service = FleetService::new(FleetConfig::default(), &root);
        let scanned = service.scan().await.expect("scan");

        assert_eq!(scanned.inventory.len(), 1);
        let app = scanned.inventory.find("app").expect("app");
        assert_eq!(app.branch(), Some("main"));
        assert!(app.is_dirty());
    }

    #[tokio::test]
    async fn resolve_primary_accepts_worktree_path_and_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = std::fs::canonicalize(dir.path()).expect("canonical");
        let app = root.join("app");
        init_repo(&app);
        let linked = root.join("app-feat");
        git(&app, &["worktree", "add", "-q", "-b", "feat", &linked.to_string_lossy()]);

        let service = FleetService::new(FleetConfig::default(), &root);
        let from_path = service
            .resolve_primary(Some(&linked.to_string_lossy()))
            .await
            .expect("by path");
        assert_eq!(std::fs::canonicalize(from_path).expect("canonical"), app);

        let from_name = service.resolve_primary(Some("app")).await.expect("by name");
        assert_eq!(from_name, PathBuf::from(&app));

        assert!(matches!(
            service.resolve_primary(Some("missing")).await,
            Err(ServiceError::UnknownRepository { .. })
        ));
    }
}
