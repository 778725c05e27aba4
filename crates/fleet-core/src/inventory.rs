//! The set of known working trees, owned by the caller and passed explicitly
//! between scan, classification and the orchestrator.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::types::{RepoKind, Repository};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    repositories: Vec<Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanWorktree {
    pub worktree: PathBuf,
    pub primary: PathBuf,
}

impl Inventory {
    /// Builds an inventory, keeping the first record for each root path.
    pub fn new(repositories: Vec<Repository>) -> Self {
        let mut seen = HashSet::new();
        let repositories = repositories
            .into_iter()
            .filter(|repo| seen.insert(repo.root.clone()))
            .collect();
        Self { repositories }
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter()
    }

    pub fn as_slice(&self) -> &[Repository] {
        &self.repositories
    }

    pub fn into_vec(self) -> Vec<Repository> {
        self.repositories
    }

    pub fn find_by_path(&self, root: &Path) -> Option<&Repository> {
        self.repositories.iter().find(|repo| repo.root == root)
    }

    pub fn find_by_path_mut(&mut self, root: &Path) -> Option<&mut Repository> {
        self.repositories.iter_mut().find(|repo| repo.root == root)
    }

    /// Matches a directory name first, then a full path.
    pub fn find(&self, name_or_path: &str) -> Option<&Repository> {
        self.repositories
            .iter()
            .find(|repo| repo.name == name_or_path)
            .or_else(|| self.find_by_path(Path::new(name_or_path)))
    }

    pub fn primaries(&self) -> impl Iterator<Item = &Repository> {
        self.repositories
            .iter()
            .filter(|repo| matches!(repo.kind, RepoKind::Primary))
    }

    pub fn worktrees_of<'a>(&'a self, primary: &'a Path) -> impl Iterator<Item = &'a Repository> {
        self.repositories.iter().filter(move |repo| match &repo.kind {
            RepoKind::Worktree { primary: owner } => owner == primary,
            RepoKind::Primary => false,
        })
    }

    pub fn selected(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter().filter(|repo| repo.selected)
    }

    pub fn set_selected(&mut self, root: &Path, selected: bool) -> bool {
        match self.find_by_path_mut(root) {
            Some(repo) => {
                repo.selected = selected;
                true
            }
            None => false,
        }
    }

    /// Replaces the record with the same root, or appends a new one.
    /// The selection flag of an existing record is preserved.
    pub fn upsert(&mut self, mut repo: Repository) {
        match self.find_by_path_mut(&repo.root) {
            Some(existing) => {
                repo.selected = existing.selected;
                *existing = repo;
            }
            None => self.repositories.push(repo),
        }
    }

    pub fn remove(&mut self, root: &Path) -> Option<Repository> {
        let index = self.repositories.iter().position(|repo| repo.root == root)?;
        Some(self.repositories.remove(index))
    }

    /// Drops records whose root no longer exists on disk, returning their roots.
    pub fn prune_missing(&mut self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        self.repositories.retain(|repo| {
            let keep = repo.root.exists();
            if !keep {
                removed.push(repo.root.clone());
            }
            keep
        });
        removed
    }

    /// Merges a fresh scan: records seen again keep their selection, records
    /// not in the scan are dropped.
    pub fn reconcile(&mut self, scanned: Vec<Repository>) {
        let previous = std::mem::take(&mut self.repositories);
        let mut next = Inventory::new(scanned);
        for repo in &mut next.repositories {
            if let Some(old) = previous.iter().find(|old| old.root == repo.root) {
                repo.selected = old.selected;
            }
        }
        *self = next;
    }

    /// Worktrees whose primary is not part of this inventory.
    pub fn orphans(&self) -> Vec<OrphanWorktree> {
        self.repositories
            .iter()
            .filter_map(|repo| match &repo.kind {
                RepoKind::Worktree { primary } if self.find_by_path(primary).is_none() => {
                    Some(OrphanWorktree {
                        worktree: repo.root.clone(),
                        primary: primary.clone(),
                    })
                }
                _ => None,
            })
            .collect()
    }
}

impl IntoIterator for Inventory {
    type Item = Repository;
    type IntoIter = std::vec::IntoIter<Repository>;

    fn into_iter(self) -> Self::IntoIter {
        self.repositories.into_iter()
    }
}

impl FromIterator<Repository> for Inventory {
    fn from_iter<T: IntoIterator<Item = Repository>>(iter: T) -> Self {
        Inventory::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn new_deduplicates_by_root() {
        let inventory = Inventory::new(vec![
            Repository::primary("/work/app"),
            Repository::primary("/work/app"),
            Repository::worktree("/work/app-feat-x", "/work/app"),
        ]);
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.worktrees_of(Path::new("/work/app")).count(), 1);
        assert!(inventory.orphans().is_empty());
    }

    #[test]
    fn orphans_lists_worktrees_without_primary() {
        let inventory = Inventory::new(vec![Repository::worktree("/work/app-x", "/elsewhere/app")]);
        let orphans = inventory.orphans();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].primary, PathBuf::from("/elsewhere/app"));
    }

    #[test]
    fn reconcile_keeps_selection_and_drops_vanished() {
        let mut inventory = Inventory::new(vec![
            Repository::primary("/work/app"),
            Repository::primary("/work/lib"),
        ]);
        assert!(inventory.set_selected(Path::new("/work/app"), true));

        inventory.reconcile(vec![
            Repository::primary("/work/app"),
            Repository::primary("/work/new"),
        ]);

        assert_eq!(inventory.len(), 2);
        assert!(inventory.find("app").expect("app kept").selected);
        assert!(inventory.find("lib").is_none());
        assert_eq!(inventory.selected().count(), 1);
    }

    #[test]
    fn upsert_preserves_selection() {
        let mut inventory = Inventory::new(vec![Repository::primary("/work/app")]);
        inventory.set_selected(Path::new("/work/app"), true);
        inventory.upsert(Repository::primary("/work/app").with_error("boom"));
        let repo = inventory.find("app").expect("app");
        assert!(repo.selected);
        assert!(repo.error.is_some());
    }

    #[test]
    fn prune_missing_removes_deleted_roots() {
        let existing = std::env::temp_dir().join(format!(
            "fleet-inventory-prune-{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir_all(&existing).expect("create dir");

        let mut inventory = Inventory::new(vec![
            Repository::primary(&existing),
            Repository::primary("/definitely/missing/fleet-repo"),
        ]);
        let removed = inventory.prune_missing();
        assert_eq!(removed, vec![PathBuf::from("/definitely/missing/fleet-repo")]);
        assert_eq!(inventory.len(), 1);

        let _ = fs::remove_dir_all(existing);
    }
}
