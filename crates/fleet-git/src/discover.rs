use std::collections::HashSet;
use std::path::{Path, PathBuf};

use fleet_core::config::ScanConfig;
use fleet_core::inventory::Inventory;
use fleet_core::types::Repository;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use walkdir::WalkDir;

use crate::command::GitCli;
use crate::error::ScanError;
use crate::worktree::{list_worktrees, same_path};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkDecision {
    Descend,
    /// `.git` directory: a primary repository. Its working files are not walked.
    Primary,
    /// `.git` file: a linked worktree, enumerated through its primary instead.
    LinkedWorktree,
    Skip,
}

/// Pruning rule for one directory met during the walk. The scan root itself
/// is never skipped by name.
pub fn walk_decision(dir: &Path, ignore: &[String], is_root: bool) -> WalkDecision {
    if !is_root {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        if name.starts_with('.') || ignore.iter().any(|ignored| ignored.as_str() == name) {
            return WalkDecision::Skip;
        }
    }

    let marker = dir.join(".git");
    if marker.is_dir() {
        WalkDecision::Primary
    } else if marker.is_file() {
        WalkDecision::LinkedWorktree
    } else {
        WalkDecision::Descend
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub repositories: Vec<Repository>,
    pub warnings: Vec<String>,
}

impl ScanReport {
    pub fn into_inventory(self) -> Inventory {
        Inventory::new(self.repositories)
    }
}

#[derive(Debug, Clone)]
pub struct Discoverer {
    git: GitCli,
    config: ScanConfig,
    concurrency: usize,
}

impl Discoverer {
    pub fn new(git: GitCli, config: ScanConfig, concurrency: usize) -> Self {
        Self {
            git,
            config,
            concurrency: concurrency.max(1),
        }
    }

    /// Finds primaries under `root` and the worktrees each one reports.
    /// Sync state is left for the classifier.
    #[instrument(skip_all, fields(root = %root.display()))]
    pub async fn scan(&self, root: &Path) -> Result<ScanReport, ScanError> {
        let root = std::fs::canonicalize(root).map_err(|source| ScanError::Root {
            path: root.to_path_buf(),
            source,
        })?;
        if !root.is_dir() {
            return Err(ScanError::Root {
                path: root,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        let walk_root = root.clone();
        let max_depth = self.config.max_depth;
        let ignore = self.config.ignore.clone();
        let (primaries, mut warnings) =
            tokio::task::spawn_blocking(move || walk_primaries(&walk_root, max_depth, &ignore))
                .await?;
        debug!(count = primaries.len(), "walk found primaries");

        let git = &self.git;
        let listings = stream::iter(primaries)
            .map(|primary| async move {
                let listed = list_worktrees(&primary, git).await;
                (primary, listed)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut seen = HashSet::new();
        let mut repositories = Vec::new();
        for (primary, listed) in listings {
            if !seen.insert(primary.clone()) {
                continue;
            }
            let primary_index = repositories.len();
            repositories.push(Repository::primary(&primary));

            let listed = match listed {
                Ok(listed) => listed,
                Err(err) => {
                    warn!(primary = %primary.display(), error = %err, "could not list worktrees");
                    warnings.push(format!(
                        "{}: could not list worktrees: {}",
                        primary.display(),
                        err.detail()
                    ));
                    continue;
                }
            };
            for entry in listed {
                if entry.bare {
                    continue;
                }
                if same_path(&entry.path, &primary) {
                    repositories[primary_index].listed_branch = entry.branch;
                    continue;
                }
                if entry.prunable || !entry.path.is_dir() {
                    warnings.push(format!(
                        "{}: stale worktree registration for {}",
                        primary.display(),
                        entry.path.display()
                    ));
                    continue;
                }
                if seen.insert(entry.path.clone()) {
                    let tree = Repository::worktree(entry.path, &primary);
                    repositories.push(tree.with_listed_branch(entry.branch));
                }
            }
        }

        Ok(ScanReport {
            repositories,
            warnings,
        })
    }
}

/// Sorted walk collecting primary roots. Unreadable entries become warnings.
pub fn walk_primaries(root: &Path, max_depth: usize, ignore: &[String]) -> (Vec<PathBuf>, Vec<String>) {
    let mut primaries = Vec::new();
    let mut warnings = Vec::new();

    let mut walker = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(next) = walker.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                warn!(path = %path, error = %err, "skipping unreadable directory");
                warnings.push(format!("{path}: {err}"));
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        match walk_decision(entry.path(), ignore, entry.depth() == 0) {
            WalkDecision::Descend => {}
            WalkDecision::Primary => {
                primaries.push(entry.path().to_path_buf());
                walker.skip_current_dir();
            }
            WalkDecision::LinkedWorktree | WalkDecision::Skip => walker.skip_current_dir(),
        }
    }

    (primaries, warnings)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use fleet_core::config::ScanConfig;
    use fleet_core::types::RepoKind;

    use super::{walk_decision, walk_primaries, Discoverer, WalkDecision};
    use crate::command::GitCli;
    use crate::repo::test_support::{init_repo_at, run_git, unique_temp_dir};

    #[test]
    fn walk_decision_distinguishes_git_dir_and_git_file() {
        let root = unique_temp_dir("decide");
        let primary = root.join("app");
        fs::create_dir_all(primary.join(".git")).expect("git dir");
        let linked = root.join("app-feat");
        fs::create_dir_all(&linked).expect("linked dir");
        fs::write(linked.join(".git"), "gitdir: /elsewhere\n").expect("git file");
        let vendored = root.join("node_modules");
        fs::create_dir_all(&vendored).expect("ignored dir");
        let plain = root.join("notes");
        fs::create_dir_all(&plain).expect("plain dir");

        let ignore = vec!["node_modules".to_string()];
        assert_eq!(walk_decision(&primary, &ignore, false), WalkDecision::Primary);
        assert_eq!(walk_decision(&linked, &ignore, false), WalkDecision::LinkedWorktree);
        assert_eq!(walk_decision(&vendored, &ignore, false), WalkDecision::Skip);
        assert_eq!(walk_decision(&plain, &ignore, false), WalkDecision::Descend);
        assert_eq!(walk_decision(&root.join(".cache"), &ignore, false), WalkDecision::Skip);

        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn walk_does_not_enter_repositories_and_respects_depth() {
        let root = unique_temp_dir("walk");
        fs::create_dir_all(root.join("a").join(".git")).expect("a");
        fs::create_dir_all(root.join("a").join("nested").join(".git")).expect("nested");
        fs::create_dir_all(root.join("group").join("b").join(".git")).expect("b");
        fs::create_dir_all(root.join("x").join("y").join("z").join("deep").join(".git"))
            .expect("deep");

        let (primaries, warnings) = walk_primaries(&root, 2, &[]);
        assert!(warnings.is_empty());
        assert_eq!(primaries, vec![root.join("a"), root.join("group").join("b")]);

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn scan_lists_primary_followed_by_its_worktrees() {
        let root = unique_temp_dir("scan");
        let app = root.join("app");
        init_repo_at(&app, true);
        let lib = root.join("lib");
        init_repo_at(&lib, true);
        let linked = root.join("app-feat-x");
        run_git(&app, &["worktree", "add", "-q", "-b", "feat/x", &linked.to_string_lossy()]);

        let discoverer = Discoverer::new(GitCli::default(), ScanConfig::default(), 4);
        let report = discoverer.scan(&root).await.expect("scan");

        let roots = report
            .repositories
            .iter()
            .map(|repo| repo.root.clone())
            .collect::<Vec<_>>();
        assert_eq!(roots, vec![app.clone(), linked.clone(), lib.clone()]);
        assert_eq!(
            report.repositories[1].kind,
            RepoKind::Worktree { primary: app.clone() }
        );
        assert!(report.repositories.iter().all(|repo| repo.state.is_none()));
        assert_eq!(report.repositories[0].listed_branch.as_deref(), Some("main"));
        assert_eq!(report.repositories[1].listed_branch.as_deref(), Some("feat/x"));

        let inventory = report.into_inventory();
        assert!(inventory.orphans().is_empty());

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn scan_of_missing_root_fails() {
        let discoverer = Discoverer::new(GitCli::default(), ScanConfig::default(), 1);
        assert!(discoverer
            .scan(std::path::Path::new("/definitely/missing/fleet-scan"))
            .await
            .is_err());
    }
}
