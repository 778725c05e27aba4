use std::path::PathBuf;

use clap::{Parser, Subcommand};
use fleet_core::action::ActionKind;

#[derive(Debug, Parser)]
#[command(name = "fleet")]
#[command(about = "Reconcile and bulk-manage git repositories, worktrees and pull requests", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: the platform config dir, fleet/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory to scan; overrides `scan_root` from the config
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Log filter, e.g. `debug` or `fleet_git=trace`; overrides FLEET_LOG
    #[arg(long, global = true, value_name = "FILTER")]
    pub log: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Discover and classify repositories under the scan root
    Scan {
        /// Only show trees with uncommitted changes
        #[arg(long)]
        dirty: bool,

        /// Look up the pull request for each tree's branch (one `gh` call per tree)
        #[arg(long)]
        pr_status: bool,
    },

    /// List your open pull requests and where they live locally
    Prs,

    /// Run one action over several repositories or pull requests
    Run {
        /// Action name, e.g. pull, rebase, discard, checkout-pr
        action: ActionKind,

        /// Repository names or paths, or pull requests as owner/name#number
        targets: Vec<String>,

        /// Every repository (or every open pull request) instead of a list
        #[arg(long, conflicts_with = "targets")]
        all: bool,

        /// Skip the confirmation prompt for destructive actions
        #[arg(short, long)]
        yes: bool,

        /// Run even where the action looks pointless or unsafe
        #[arg(long)]
        force: bool,
    },

    /// Manage linked worktrees
    #[command(subcommand)]
    Worktree(WorktreeCommand),

    /// Allocate a numbered feature branch, worktree and spec file
    Feature {
        /// Feature description
        #[arg(required = true, num_args = 1..)]
        description: Vec<String>,

        /// Primary repository (name or path); defaults to the current directory
        #[arg(long)]
        repo: Option<String>,

        /// Print the allocation without creating anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect or create the config file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum WorktreeCommand {
    /// Create (or reuse) the worktree for a branch beside its primary
    Add {
        /// Branch to check out
        branch: String,

        /// Primary repository (name or path); defaults to the current directory
        #[arg(long)]
        repo: Option<String>,

        /// Create the branch from HEAD when it does not exist yet
        #[arg(short = 'b', long)]
        create: bool,
    },

    /// Deregister and delete a linked worktree
    Rm {
        path: PathBuf,

        /// Discard uncommitted changes
        #[arg(long)]
        force: bool,
    },

    /// List a primary's worktrees
    Ls {
        /// Primary repository (name or path); defaults to the current directory
        repo: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective config
    Show,
}

#[cfg(test)]
mod tests {
    use clap::{CommandFactory, Parser};
    use fleet_core::action::ActionKind;

    use super::{Cli, Command, WorktreeCommand};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_action_and_targets() {
        let cli = Cli::try_parse_from(["fleet", "--json", "run", "force_push", "app", "lib", "-y"])
            .expect("parse");
        assert!(cli.json);
        match cli.command {
            Command::Run {
                action,
                targets,
                yes,
                force,
                all,
            } => {
                assert_eq!(action, ActionKind::ForcePush);
                assert_eq!(targets, vec!["app".to_string(), "lib".to_string()]);
                assert!(yes);
                assert!(!force);
                assert!(!all);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn scan_takes_pr_status_flag() {
        let cli = Cli::try_parse_from(["fleet", "scan", "--pr-status"]).expect("parse");
        assert!(matches!(
            cli.command,
            Command::Scan {
                dirty: false,
                pr_status: true
            }
        ));
    }

    #[test]
    fn rejects_unknown_action() {
        let err = Cli::try_parse_from(["fleet", "run", "merge", "app"]).expect_err("bad action");
        assert!(err.to_string().contains("invalid action 'merge'"));
    }

    #[test]
    fn parses_worktree_and_feature_commands() {
        let cli = Cli::try_parse_from(["fleet", "worktree", "add", "feat/x", "-b", "--repo", "app"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Worktree(WorktreeCommand::Add { ref branch, create: true, .. }) if branch == "feat/x"
        ));

        let cli = Cli::try_parse_from(["fleet", "feature", "Build", "dashboard", "--dry-run"])
            .expect("parse");
        match cli.command {
            Command::Feature {
                description,
                dry_run,
                repo,
            } => {
                assert_eq!(description.join(" "), "Build dashboard");
                assert!(dry_run);
                assert!(repo.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
