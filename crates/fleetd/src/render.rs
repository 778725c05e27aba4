//! Human-readable tables for the CLI, built with comfy-table.

use std::io::IsTerminal;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use fleet_core::action::{BulkOperationResult, BulkSummary, Outcome};
use fleet_core::inventory::Inventory;
use fleet_core::types::{
    FeatureAllocation, LocalStatus, PrStatus, RepoKind, Repository, ReviewRequest, SyncState,
    WorktreeMapping,
};

#[derive(Debug, Clone, Copy)]
pub struct TableRenderer {
    use_colors: bool,
}

impl Default for TableRenderer {
    fn default() -> Self {
        Self {
            use_colors: std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
        }
    }
}

impl TableRenderer {
    pub fn plain() -> Self {
        Self { use_colors: false }
    }

    pub fn inventory(&self, inventory: &Inventory) -> String {
        self.repositories(inventory.iter())
    }

    /// The PR column appears once any tree carries a looked-up status.
    pub fn repositories<'a>(&self, repos: impl Iterator<Item = &'a Repository>) -> String {
        let repos = repos.collect::<Vec<_>>();
        let with_prs = repos.iter().any(|repo| repo.pr_status.is_some());
        let mut headers = vec!["Name", "Kind", "Branch", "Status", "Main"];
        if with_prs {
            headers.push("PR");
        }
        headers.push("Path");
        let mut table = self.base_table(&headers);
        for repo in repos {
            let kind = match repo.kind {
                RepoKind::Primary => "primary",
                RepoKind::Worktree { .. } => "worktree",
            };
            let (status, main) = match (&repo.state, &repo.error) {
                (Some(state), None) => {
                    let main = if state.needs_rebase {
                        format!("{} (-{})", state.main_branch, state.behind_main)
                    } else {
                        state.main_branch.clone()
                    };
                    (state.sync_label(), main)
                }
                (_, Some(error)) => (format!("unknown: {error}"), "-".to_string()),
                (None, None) => ("unclassified".to_string(), "-".to_string()),
            };
            let mut row = vec![
                Cell::new(&repo.name),
                Cell::new(kind),
                Cell::new(repo.checked_out_branch().unwrap_or("-")),
                self.colored(status, sync_color(repo)),
                Cell::new(main),
            ];
            if with_prs {
                let status = repo.pr_status.unwrap_or(PrStatus::NotApplicable);
                row.push(self.colored(status.label(), pr_color(status)));
            }
            row.push(Cell::new(repo.root.display()));
            table.add_row(row);
        }
        table.to_string()
    }

    pub fn review_requests(&self, requests: &[ReviewRequest]) -> String {
        let mut table = self.base_table(&["PR", "Title", "Branch", "Local", "Path"]);
        for pr in requests {
            let color = match pr.local_status {
                LocalStatus::CheckedOut { .. } => Color::Green,
                LocalStatus::Available { .. } => Color::Yellow,
                LocalStatus::NotCloned => Color::DarkGrey,
            };
            table.add_row(vec![
                Cell::new(pr.reference()),
                Cell::new(truncate(&pr.title, 50)),
                Cell::new(if pr.head_branch.is_empty() { "?" } else { &pr.head_branch }),
                self.colored(pr.local_status.as_str().to_string(), color),
                Cell::new(
                    pr.local_status
                        .path()
                        .map(|path| path.display().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ),
            ]);
        }
        table.to_string()
    }

    pub fn results(&self, results: &[BulkOperationResult]) -> String {
        let mut table = self.base_table(&["Target", "Outcome", "Detail", "Time"]);
        for result in results {
            let color = match result.outcome {
                Outcome::Succeeded => Color::Green,
                Outcome::Failed => Color::Red,
                Outcome::Skipped => Color::Yellow,
                Outcome::Cancelled => Color::DarkGrey,
            };
            table.add_row(vec![
                Cell::new(&result.target.label),
                self.colored(result.outcome.as_str().to_string(), color),
                Cell::new(&result.detail),
                Cell::new(format!("{:.1}s", result.duration.as_secs_f64())),
            ]);
        }
        format!("{table}\n{}", summary_line(&BulkSummary::from_results(results)))
    }

    pub fn worktrees(&self, mappings: &[WorktreeMapping]) -> String {
        let mut table = self.base_table(&["Branch", "Path"]);
        for mapping in mappings {
            table.add_row(vec![
                Cell::new(&mapping.branch),
                Cell::new(mapping.path.display()),
            ]);
        }
        table.to_string()
    }

    pub fn feature(&self, allocation: &FeatureAllocation) -> String {
        let mut table = self.base_table(&["Field", "Value"]);
        table.add_row(vec![Cell::new("number"), Cell::new(&allocation.number_label)]);
        table.add_row(vec![Cell::new("branch"), Cell::new(&allocation.branch)]);
        table.add_row(vec![
            Cell::new("worktree"),
            Cell::new(allocation.worktree_path.display()),
        ]);
        table.add_row(vec![
            Cell::new("spec"),
            Cell::new(allocation.spec_path.display()),
        ]);
        table.to_string()
    }

    fn base_table(&self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        if !self.use_colors {
            table.force_no_tty();
        }
        table.set_header(
            headers
                .iter()
                .map(|header| Cell::new(header).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
        table
    }

    fn colored(&self, text: String, color: Color) -> Cell {
        if self.use_colors {
            Cell::new(text).fg(color)
        } else {
            Cell::new(text)
        }
    }
}

fn sync_color(repo: &Repository) -> Color {
    match repo.sync() {
        SyncState::InSync if repo.is_dirty() => Color::Yellow,
        SyncState::InSync => Color::Green,
        SyncState::Ahead => Color::Cyan,
        SyncState::Behind => Color::Yellow,
        SyncState::Diverged => Color::Red,
        SyncState::LocalOnly => Color::Blue,
        SyncState::Unknown => Color::DarkGrey,
    }
}

fn pr_color(status: PrStatus) -> Color {
    match status {
        PrStatus::Open { .. } => Color::Green,
        PrStatus::Merged { .. } => Color::Magenta,
        PrStatus::Closed { .. } => Color::Red,
        PrStatus::NoPr => Color::Yellow,
        PrStatus::NotApplicable | PrStatus::Unknown => Color::DarkGrey,
    }
}

pub fn summary_line(summary: &BulkSummary) -> String {
    format!(
        "{} ok, {} failed, {} skipped, {} cancelled",
        summary.succeeded, summary.failed, summary.skipped, summary.cancelled
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}
