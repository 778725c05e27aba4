//! Numbered feature workstreams: `NNN-slug` branch, sibling worktree and a
//! seeded `specs/NNN-slug/spec.md`.

use std::ffi::OsString;
use std::fs;
use std::path::Path;

use fleet_core::config::FeatureConfig;
use fleet_core::slug::{feature_slug, format_feature_number, numeric_prefix};
use fleet_core::types::FeatureAllocation;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::FeatureError;
use crate::repo::{local_branch_exists, remote_branch_exists};
use crate::worktree::{list_worktrees, worktree_path, CreateOptions, WorktreeManager};

pub const SPECS_DIR: &str = "specs";
pub const SPEC_FILE: &str = "spec.md";
pub const SPECIFY_DIR: &str = ".specify";
pub const SPEC_TEMPLATE: &str = ".specify/templates/spec-template.md";

#[derive(Debug, Clone)]
pub struct FeatureAllocator {
    worktrees: WorktreeManager,
    remote: String,
    config: FeatureConfig,
}

impl FeatureAllocator {
    pub fn new(
        worktrees: WorktreeManager,
        remote: impl Into<String>,
        config: FeatureConfig,
    ) -> Self {
        Self {
            worktrees,
            remote: remote.into(),
            config,
        }
    }

    /// Computes the next allocation without touching the repository.
    #[instrument(skip_all, fields(primary = %primary.display()))]
    pub async fn plan(
        &self,
        primary: &Path,
        description: &str,
    ) -> Result<FeatureAllocation, FeatureError> {
        let slug = feature_slug(description, &self.config.extra_stop_words)
            .ok_or(FeatureError::NoDescriptionProvided)?;
        let highest = self.highest_number(primary).await?;
        let number = highest
            .checked_add(1)
            .ok_or(FeatureError::NumberExhausted { highest })?;
        let number_label = format_feature_number(number, self.config.number_width);
        let branch = format!("{number_label}-{slug}");
        let worktree_path = worktree_path(primary, &branch)?;
        let spec_path = worktree_path.join(SPECS_DIR).join(&branch).join(SPEC_FILE);

        debug!(number, %branch, "planned feature");
        Ok(FeatureAllocation {
            number,
            number_label,
            slug,
            branch,
            worktree_path,
            spec_path,
        })
    }

    /// Plans and materializes the workstream under the primary's exclusive
    /// lock, so concurrent allocations never share a number. A failure while
    /// seeding the spec removes the new worktree and branch again.
    #[instrument(skip_all, fields(primary = %primary.display()))]
    pub async fn allocate(
        &self,
        primary: &Path,
        description: &str,
    ) -> Result<FeatureAllocation, FeatureError> {
        let _guard = self.worktrees.locks().write(primary).await;
        let allocation = self.plan(primary, description).await?;

        let git = self.worktrees.git();
        if local_branch_exists(primary, &allocation.branch, git).await?
            || remote_branch_exists(primary, &self.remote, &allocation.branch, git).await?
        {
            return Err(FeatureError::BranchExists {
                branch: allocation.branch,
            });
        }

        let options = CreateOptions { create_branch: true };
        self.worktrees
            .create_worktree_unlocked(primary, &allocation.branch, options)
            .await?;

        let seed_primary = primary.to_path_buf();
        let seed_allocation = allocation.clone();
        let seed_description = description.trim().to_string();
        let seeded = tokio::task::spawn_blocking(move || {
            write_spec(&seed_primary, &seed_allocation, &seed_description)?;
            copy_specify_dir(&seed_primary, &seed_allocation.worktree_path)
        })
        .await
        .map_err(FeatureError::from)
        .and_then(|result| result);
        if let Err(err) = seeded {
            self.roll_back(primary, &allocation).await;
            return Err(err);
        }

        info!(
            branch = %allocation.branch,
            path = %allocation.worktree_path.display(),
            "allocated feature"
        );
        Ok(allocation)
    }

    /// Best effort: the caller's error is what gets reported.
    async fn roll_back(&self, primary: &Path, allocation: &FeatureAllocation) {
        let git = self.worktrees.git();
        let remove: [OsString; 4] = [
            "worktree".into(),
            "remove".into(),
            "--force".into(),
            allocation.worktree_path.as_os_str().to_os_string(),
        ];
        if let Err(err) = git.run(primary, remove).await {
            warn!(
                path = %allocation.worktree_path.display(),
                error = %err,
                "rollback could not remove worktree"
            );
        }
        if let Err(err) = git
            .run(primary, ["branch", "-D", allocation.branch.as_str()])
            .await
        {
            warn!(branch = %allocation.branch, error = %err, "rollback could not delete branch");
        }
        debug!(branch = %allocation.branch, "rolled back feature allocation");
    }

    /// Highest `NNN-` prefix across local and remote-tracking branches and the
    /// spec folders of the primary and every worktree. Zero when none exist.
    async fn highest_number(&self, primary: &Path) -> Result<u32, FeatureError> {
        let git = self.worktrees.git();
        let refs = git
            .run(
                primary,
                ["for-each-ref", "--format=%(refname)", "refs/heads", "refs/remotes"],
            )
            .await?;
        let mut highest = refs
            .stdout
            .lines()
            .filter_map(short_branch_name)
            .filter_map(numeric_prefix)
            .max()
            .unwrap_or(0);

        let mut trees = vec![primary.to_path_buf()];
        trees.extend(
            list_worktrees(primary, git)
                .await?
                .into_iter()
                .filter(|entry| !entry.bare)
                .map(|entry| entry.path),
        );
        for tree in trees {
            highest = highest.max(highest_spec_number(&tree.join(SPECS_DIR)));
        }
        Ok(highest)
    }
}

/// Branch name without `refs/heads/` or `refs/remotes/<remote>/`.
fn short_branch_name(refname: &str) -> Option<&str> {
    let refname = refname.trim();
    if let Some(local) = refname.strip_prefix("refs/heads/") {
        return Some(local);
    }
    let remote = refname.strip_prefix("refs/remotes/")?;
    remote.split_once('/').map(|(_, branch)| branch)
}

fn highest_spec_number(specs_dir: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(specs_dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| numeric_prefix(&entry.file_name().to_string_lossy()))
        .max()
        .unwrap_or(0)
}

fn write_spec(
    primary: &Path,
    allocation: &FeatureAllocation,
    description: &str,
) -> Result<(), FeatureError> {
    let spec_dir = allocation
        .spec_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| allocation.worktree_path.join(SPECS_DIR));
    fs::create_dir_all(&spec_dir).map_err(|source| FeatureError::Filesystem {
        path: spec_dir.clone(),
        source,
    })?;

    let template_path = primary.join(SPEC_TEMPLATE);
    let body = match fs::read_to_string(&template_path) {
        Ok(template) => render_template(&template, description),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => default_spec(description),
        Err(source) => {
            return Err(FeatureError::Filesystem {
                path: template_path,
                source,
            })
        }
    };

    fs::write(&allocation.spec_path, body).map_err(|source| FeatureError::Filesystem {
        path: allocation.spec_path.clone(),
        source,
    })
}

pub fn render_template(template: &str, description: &str) -> String {
    template
        .replace("$ARGUMENTS", description)
        .replace("[FEATURE NAME]", description)
}

pub fn default_spec(description: &str) -> String {
    format!(
        "# Feature: {description}\n\
         \n\
         ## Overview\n\
         \n\
         [NEEDS CLARIFICATION: Detailed requirements]\n\
         \n\
         ## User Stories\n\
         \n\
         ### US1: [Primary User Story]\n\
         \n\
         **As a** [user type]\n\
         **I want** [capability]\n\
         **So that** [benefit]\n\
         \n\
         #### Acceptance Criteria\n\
         - [ ] [Criterion 1]\n\
         - [ ] [Criterion 2]\n\
         \n\
         ## Success Criteria\n\
         \n\
         - **SC-001**: [Measurable metric]\n\
         \n\
         ## Out of Scope\n\
         \n\
         - [Explicitly excluded items]\n"
    )
}

/// Copies the primary's `.specify/` into the worktree unless it already has one
/// (a tracked `.specify/` arrives with the checkout).
fn copy_specify_dir(primary: &Path, worktree: &Path) -> Result<(), FeatureError> {
    let source = primary.join(SPECIFY_DIR);
    let target = worktree.join(SPECIFY_DIR);
    if !source.is_dir() || target.exists() {
        return Ok(());
    }
    copy_dir_recursive(&source, &target)
}

/// Mirrors `source` into `target`. Symlinks are recreated, never followed.
fn copy_dir_recursive(source: &Path, target: &Path) -> Result<(), FeatureError> {
    let fs_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| FeatureError::Filesystem { path, source }
    };

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(source).to_path_buf();
            FeatureError::Filesystem {
                path,
                source: err.into(),
            }
        })?;
        let from = entry.path();
        let relative = from.strip_prefix(source).unwrap_or(from);
        let to = target.join(relative);
        let kind = entry.file_type();
        if kind.is_dir() {
            fs::create_dir_all(&to).map_err(fs_err(&to))?;
        } else if kind.is_symlink() {
            let link = fs::read_link(from).map_err(fs_err(from))?;
            copy_symlink(&link, &to).map_err(fs_err(&to))?;
        } else {
            fs::copy(from, &to).map_err(fs_err(from))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(link, to)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, to: &Path) -> std::io::Result<()> {
    debug!(link = %link.display(), to = %to.display(), "skipping symlink");
    Ok(())
}
