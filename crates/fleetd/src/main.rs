use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use fleet_core::action::{ActionKind, BulkOperationResult, BulkSummary, TargetKind};
use fleet_core::config::{
    default_config_path, load_config_or_default, save_config, ConfigError, FleetConfig,
};
use fleet_core::validation::{Validate, ValidationLevel};
use fleet_git::{same_path, CreateOptions, FeatureError, RemoveOptions, WorktreeError};
use fleet_ops::BulkOptions;
use fleetd::{
    init_logging, resolve_repositories, resolve_review_requests, Cli, Command, ConfigCommand,
    FleetService, LoggingError, ServiceError, TableRenderer, WorktreeCommand,
};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("config file already exists at {path}; pass --force to overwrite it")]
    ConfigExists { path: PathBuf },
    #[error("invalid config:\n{0}")]
    InvalidConfig(String),
    #[error("failed to resolve scan root {path}: {source}")]
    ScanRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Feature(#[from] FeatureError),
    #[error("{path} is not a linked worktree of {primary}")]
    NotAWorktree { path: PathBuf, primary: PathBuf },
    #[error("'{action}' is destructive; pass --yes to run it without a terminal")]
    ConfirmationRequired { action: ActionKind },
    #[error("aborted")]
    Aborted,
    #[error("failed to read confirmation: {0}")]
    Prompt(#[source] io::Error),
    #[error("failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render config: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("{failed} of {total} targets failed")]
    TargetsFailed { failed: usize, total: usize },
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("fleet: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), MainError> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    if let Command::Config(ConfigCommand::Init { force }) = &cli.command {
        return init_config(&config_path, *force);
    }

    let config = load_config_or_default(&config_path)?;
    init_logging(&config.logging, cli.log.as_deref())?;
    check_config(&config)?;

    if let Command::Config(ConfigCommand::Show) = &cli.command {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        return Ok(());
    }

    let scan_root = resolve_scan_root(cli.root.as_deref(), &config)?;
    info!(root = %scan_root.display(), config = %config_path.display(), "starting");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(MainError::Runtime)?;
    let service = FleetService::new(config, scan_root);
    runtime.block_on(dispatch(&service, cli.command, cli.json))
}

fn init_config(path: &Path, force: bool) -> Result<(), MainError> {
    if path.exists() && !force {
        return Err(MainError::ConfigExists {
            path: path.to_path_buf(),
        });
    }
    save_config(path, &FleetConfig::default())?;
    println!("wrote {}", path.display());
    Ok(())
}

/// Warnings are logged; any error-level issue refuses to start.
fn check_config(config: &FleetConfig) -> Result<(), MainError> {
    let mut errors = Vec::new();
    for issue in config.validate() {
        match issue.level {
            ValidationLevel::Warning => warn!(code = issue.code, "{}", issue.message),
            ValidationLevel::Error => errors.push(format!("  {}: {}", issue.code, issue.message)),
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(MainError::InvalidConfig(errors.join("\n")))
    }
}

fn resolve_scan_root(cli_root: Option<&Path>, config: &FleetConfig) -> Result<PathBuf, MainError> {
    let root = match cli_root.or(config.scan_root.as_deref()) {
        Some(root) => root.to_path_buf(),
        None => std::env::current_dir().map_err(|source| MainError::ScanRoot {
            path: PathBuf::from("."),
            source,
        })?,
    };
    std::fs::canonicalize(&root).map_err(|source| MainError::ScanRoot { path: root, source })
}

async fn dispatch(service: &FleetService, command: Command, json: bool) -> Result<(), MainError> {
    let renderer = TableRenderer::default();

    match command {
        Command::Scan { dirty, pr_status } => {
            let mut scanned = service.scan().await?;
            report_scan_warnings(&scanned.warnings);
            for orphan in scanned.inventory.orphans() {
                warn!(
                    worktree = %orphan.worktree.display(),
                    primary = %orphan.primary.display(),
                    "worktree's primary is outside the scan root"
                );
            }
            if pr_status {
                service.annotate_pr_status(&mut scanned.inventory).await;
            }
            let shown = scanned
                .inventory
                .iter()
                .filter(|repo| !dirty || repo.is_dirty())
                .collect::<Vec<_>>();
            emit(json, &shown, || renderer.repositories(shown.iter().copied()))
        }
        Command::Prs => {
            let scanned = service.scan().await?;
            report_scan_warnings(&scanned.warnings);
            let requests = service.review_requests(&scanned.inventory).await?;
            emit(json, &requests, || renderer.review_requests(&requests))
        }
        Command::Run {
            action,
            targets,
            all,
            yes,
            force,
        } => {
            let scanned = service.scan().await?;
            report_scan_warnings(&scanned.warnings);
            let targets = match action.target_kind() {
                TargetKind::Repository => resolve_repositories(&scanned.inventory, &targets, all)?,
                TargetKind::ReviewRequest => {
                    let requests = service.review_requests(&scanned.inventory).await?;
                    resolve_review_requests(&requests, &targets, all)?
                }
            };
            if targets.is_empty() {
                eprintln!("nothing to do");
                return Ok(());
            }
            confirm(action, targets.len(), yes)?;

            let results = run_with_interrupt(service, targets, action, !force).await;
            emit(json, &results, || renderer.results(&results))?;
            let summary = BulkSummary::from_results(&results);
            if summary.failed > 0 {
                return Err(MainError::TargetsFailed {
                    failed: summary.failed,
                    total: results.len(),
                });
            }
            Ok(())
        }
        Command::Worktree(WorktreeCommand::Add {
            branch,
            repo,
            create,
        }) => {
            let primary = service.resolve_primary(repo.as_deref()).await?;
            let mapping = service
                .worktrees()
                .create_worktree(&primary, &branch, CreateOptions { create_branch: create })
                .await?;
            emit(json, &mapping, || renderer.worktrees(std::slice::from_ref(&mapping)))
        }
        Command::Worktree(WorktreeCommand::Rm { path, force }) => {
            let path_text = path.to_string_lossy();
            let primary = service.resolve_primary(Some(path_text.as_ref())).await?;
            let worktrees = service.worktrees();
            let mapping = worktrees
                .list(&primary)
                .await?
                .into_iter()
                .find(|mapping| same_path(&mapping.path, &path))
                .ok_or_else(|| MainError::NotAWorktree {
                    path: path.clone(),
                    primary: primary.clone(),
                })?;
            worktrees
                .remove_worktree(&mapping, RemoveOptions { force })
                .await?;
            emit(json, &mapping, || format!("removed {}", mapping.path.display()))
        }
        Command::Worktree(WorktreeCommand::Ls { repo }) => {
            let primary = service.resolve_primary(repo.as_deref()).await?;
            let mappings = service.worktrees().list(&primary).await?;
            emit(json, &mappings, || renderer.worktrees(&mappings))
        }
        Command::Feature {
            description,
            repo,
            dry_run,
        } => {
            let primary = service.resolve_primary(repo.as_deref()).await?;
            let description = description.join(" ");
            let features = service.features();
            let allocation = if dry_run {
                features.plan(&primary, &description).await?
            } else {
                features.allocate(&primary, &description).await?
            };
            emit(json, &allocation, || renderer.feature(&allocation))
        }
        // Handled before the runtime starts.
        Command::Config(_) => Ok(()),
    }
}

/// Runs the bulk action; Ctrl-C cancels every target still pending or in
/// flight and the run still reports one result per target.
async fn run_with_interrupt(
    service: &FleetService,
    targets: Vec<fleet_core::action::Target>,
    action: ActionKind,
    skip_ineligible: bool,
) -> Vec<BulkOperationResult> {
    let handle = service
        .orchestrator()
        .start(targets, action, BulkOptions { skip_ineligible });
    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling remaining targets");
            token.cancel();
        }
    });

    let results = handle.wait().await;
    interrupt.abort();
    results
}

fn confirm(action: ActionKind, count: usize, yes: bool) -> Result<(), MainError> {
    if !action.is_destructive() || yes {
        return Ok(());
    }
    if !io::stdin().is_terminal() {
        return Err(MainError::ConfirmationRequired { action });
    }

    eprint!("'{action}' cannot be undone and will run on {count} target(s). Continue? [y/N] ");
    io::stderr().flush().map_err(MainError::Prompt)?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer).map_err(MainError::Prompt)?;
    if is_yes(&answer) {
        Ok(())
    } else {
        Err(MainError::Aborted)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn report_scan_warnings(warnings: &[String]) {
    for warning in warnings {
        warn!("{warning}");
    }
}

fn emit<T: Serialize + ?Sized>(
    json: bool,
    value: &T,
    table: impl FnOnce() -> String,
) -> Result<(), MainError> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", table());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{check_config, init_config, is_yes, resolve_scan_root, MainError};
    use fleet_core::config::{load_config, FleetConfig};

    #[test]
    fn confirmation_accepts_only_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no"));
    }

    #[test]
    fn invalid_config_refuses_to_start() {
        let mut config = FleetConfig::default();
        config.concurrency.bulk = 0;
        let err = check_config(&config).expect_err("zero concurrency");
        assert!(matches!(err, MainError::InvalidConfig(ref msg) if msg.contains("concurrency.bulk")));
        assert!(check_config(&FleetConfig::default()).is_ok());
    }

    #[test]
    fn init_config_writes_defaults_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fleet").join("config.toml");

        init_config(&path, false).expect("first init");
        assert_eq!(load_config(&path).expect("load"), FleetConfig::default());
        assert!(matches!(
            init_config(&path, false),
            Err(MainError::ConfigExists { .. })
        ));
        init_config(&path, true).expect("forced init");
    }

    #[test]
    fn scan_root_prefers_cli_then_config() {
        let cli_dir = tempfile::tempdir().expect("cli dir");
        let config_dir = tempfile::tempdir().expect("config dir");
        let mut config = FleetConfig::default();
        config.scan_root = Some(config_dir.path().to_path_buf());

        let from_cli = resolve_scan_root(Some(cli_dir.path()), &config).expect("cli root");
        assert_eq!(from_cli, std::fs::canonicalize(cli_dir.path()).expect("canonical"));

        let from_config = resolve_scan_root(None, &config).expect("config root");
        assert_eq!(from_config, std::fs::canonicalize(config_dir.path()).expect("canonical"));

        config.scan_root = Some(config_dir.path().join("missing"));
        assert!(matches!(
            resolve_scan_root(None, &config),
            Err(MainError::ScanRoot { .. })
        ));
    }
}
