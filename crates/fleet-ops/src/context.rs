use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::config::{FleetConfig, GitConfig};
use fleet_git::{GitCli, PathLocks, WorktreeManager};
use fleet_review::ReviewClient;

/// Hands a URL to the desktop. Behind a trait so bulk runs can be exercised
/// without launching anything.
pub trait BrowserOpener: Send + Sync + fmt::Debug {
    fn open(&self, url: &str) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        webbrowser::open(url)
    }
}

/// Everything a recipe needs, shared by all targets of a run.
#[derive(Debug, Clone)]
pub struct OpsContext {
    git: GitCli,
    git_config: GitConfig,
    worktrees: WorktreeManager,
    review: ReviewClient,
    browser: Arc<dyn BrowserOpener>,
    locks: PathLocks,
    scan_root: PathBuf,
}

impl OpsContext {
    pub fn new(config: &FleetConfig, scan_root: impl Into<PathBuf>, locks: PathLocks) -> Self {
        let scan_root = scan_root.into();
        let git = GitCli::new(config.git.binary.clone(), config.git.timeout());
        let review = ReviewClient::new(&config.review, config.concurrency.remote_lookups)
            .with_workdir(scan_root.clone());
        Self::from_parts(
            git,
            config.git.clone(),
            review,
            Arc::new(SystemBrowser),
            locks,
            scan_root,
        )
    }

    pub fn from_parts(
        git: GitCli,
        git_config: GitConfig,
        review: ReviewClient,
        browser: Arc<dyn BrowserOpener>,
        locks: PathLocks,
        scan_root: PathBuf,
    ) -> Self {
        let worktrees = WorktreeManager::new(
            git.clone(),
            git_config.default_remote.clone(),
            locks.clone(),
        );
        Self {
            git,
            git_config,
            worktrees,
            review,
            browser,
            locks,
            scan_root,
        }
    }

    pub fn git(&self) -> &GitCli {
        &self.git
    }

    pub fn git_config(&self) -> &GitConfig {
        &self.git_config
    }

    pub fn remote(&self) -> &str {
        &self.git_config.default_remote
    }

    pub fn worktrees(&self) -> &WorktreeManager {
        &self.worktrees
    }

    pub fn review(&self) -> &ReviewClient {
        &self.review
    }

    pub fn browser(&self) -> &dyn BrowserOpener {
        self.browser.as_ref()
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    /// Where not-cloned repositories are cloned to.
    pub fn scan_root(&self) -> &Path {
        &self.scan_root
    }
}
