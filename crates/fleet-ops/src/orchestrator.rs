use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fleet_core::action::{
    ActionKind, BulkOperationResult, BulkSummary, Outcome, Target, TargetRef,
};
use fleet_core::eligibility::why_not;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use crate::context::OpsContext;
use crate::recipe::run_recipe;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOptions {
    /// Report targets the eligibility rules reject as skipped instead of
    /// running the recipe against them.
    pub skip_ineligible: bool,
}

/// Fans one action out over many targets with bounded parallelism. A failing,
/// panicking or cancelled target never affects the others.
#[derive(Debug, Clone)]
pub struct BulkOrchestrator {
    context: Arc<OpsContext>,
    concurrency: usize,
}

impl BulkOrchestrator {
    pub fn new(context: OpsContext, concurrency: usize) -> Self {
        Self {
            context: Arc::new(context),
            concurrency: concurrency.max(1),
        }
    }

    pub fn context(&self) -> &OpsContext {
        &self.context
    }

    /// Runs `action` over every target and returns one result per target, in
    /// target order.
    pub async fn run_bulk(&self, targets: Vec<Target>, action: ActionKind) -> Vec<BulkOperationResult> {
        self.start(targets, action, BulkOptions::default())
            .wait()
            .await
    }

    /// Spawns the run and returns at once. Needs a running tokio runtime.
    pub fn start(&self, targets: Vec<Target>, action: ActionKind, options: BulkOptions) -> BulkHandle {
        let span = tracing::info_span!("run_bulk", action = %action, targets = targets.len());
        info!(parent: &span, skip_ineligible = options.skip_ineligible, "bulk run started");

        let run_token = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let tasks = targets
            .into_iter()
            .map(|target| {
                let reference = target.reference();
                let token = run_token.child_token();
                let task = run_target(
                    Arc::clone(&self.context),
                    Arc::clone(&semaphore),
                    token.clone(),
                    action,
                    target,
                    options,
                );
                TargetTask {
                    reference,
                    token,
                    handle: tokio::spawn(task.instrument(span.clone())),
                }
            })
            .collect();

        BulkHandle {
            action,
            run_token,
            tasks,
            span,
        }
    }
}

#[derive(Debug)]
struct TargetTask {
    reference: TargetRef,
    token: CancellationToken,
    handle: JoinHandle<BulkOperationResult>,
}

/// A bulk run in flight.
#[derive(Debug)]
pub struct BulkHandle {
    action: ActionKind,
    run_token: CancellationToken,
    tasks: Vec<TargetTask>,
    span: Span,
}

impl BulkHandle {
    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetRef> {
        self.tasks.iter().map(|task| &task.reference)
    }

    /// Cancels one target. Queued targets never start; a running one has its
    /// in-flight command killed. Returns false for an unknown index.
    pub fn cancel(&self, index: usize) -> bool {
        match self.tasks.get(index) {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.run_token.cancel();
    }

    /// Token cancelling the whole run, for wiring to a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.run_token.clone()
    }

    pub async fn wait(self) -> Vec<BulkOperationResult> {
        let BulkHandle {
            action,
            tasks,
            span,
            ..
        } = self;
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            let result = match task.handle.await {
                Ok(result) => result,
                Err(err) => {
                    let detail = if err.is_panic() {
                        "recipe panicked".to_string()
                    } else {
                        format!("task ended early: {err}")
                    };
                    warn!(
                        parent: &span,
                        target = %task.reference.label,
                        detail = %detail,
                        "bulk target failed"
                    );
                    BulkOperationResult {
                        target: task.reference,
                        action,
                        outcome: Outcome::Failed,
                        detail,
                        started_at: Utc::now(),
                        duration: Duration::ZERO,
                    }
                }
            };
            results.push(result);
        }

        let summary = BulkSummary::from_results(&results);
        info!(
            parent: &span,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "bulk run finished"
        );
        results
    }
}

async fn run_target(
    context: Arc<OpsContext>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    action: ActionKind,
    target: Target,
    options: BulkOptions,
) -> BulkOperationResult {
    let started_at = Utc::now();
    let clock = Instant::now();

    let (outcome, detail) = tokio::select! {
        biased;
        _ = token.cancelled() => (Outcome::Cancelled, "cancelled".to_string()),
        finished = execute(&context, &semaphore, action, &target, options) => finished,
    };

    let reference = target.reference();
    match outcome {
        Outcome::Failed => warn!(target = %reference.label, detail = %detail, "bulk target failed"),
        _ => debug!(target = %reference.label, outcome = outcome.as_str(), "bulk target finished"),
    }

    BulkOperationResult {
        target: reference,
        action,
        outcome,
        detail,
        started_at,
        duration: clock.elapsed(),
    }
}

async fn execute(
    context: &OpsContext,
    semaphore: &Semaphore,
    action: ActionKind,
    target: &Target,
    options: BulkOptions,
) -> (Outcome, String) {
    if options.skip_ineligible {
        if let Some(reason) = why_not(action, target, context.git_config()) {
            return (Outcome::Skipped, reason);
        }
    }

    let _permit = match semaphore.acquire().await {
        Ok(permit) => permit,
        Err(_) => return (Outcome::Failed, "bulk run was shut down".to_string()),
    };
    match run_recipe(context, action, target).await {
        Ok(detail) => (Outcome::Succeeded, detail),
        Err(err) => (Outcome::Failed, err.detail()),
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use fleet_core::action::{ActionKind, Outcome, Target};
    use fleet_core::types::Repository;
    use fleet_git::{CommandGateway, CommandOutput, GatewayError, GitCli, ScriptedGateway};

    use super::{BulkOptions, BulkOrchestrator};
    use crate::test_support::{context, context_with, init_repo_at, unique_temp_dir};

    #[derive(Debug)]
    struct SlowGateway;

    #[async_trait]
    impl CommandGateway for SlowGateway {
        async fn exec(&self, _cwd: &Path, _args: &[OsString]) -> Result<CommandOutput, GatewayError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(GatewayError::Timeout {
                command: "git".to_string(),
                after: Duration::from_secs(30),
            })
        }
    }

    #[derive(Debug)]
    struct PanickingGateway;

    #[async_trait]
    impl CommandGateway for PanickingGateway {
        async fn exec(&self, _cwd: &Path, _args: &[OsString]) -> Result<CommandOutput, GatewayError> {
            panic!("gateway exploded");
        }
    }

    fn repo(root: &Path) -> Target {
        Target::Repository(Repository::primary(root))
    }

    #[tokio::test]
    async fn one_failing_target_does_not_affect_the_others() {
        let root = unique_temp_dir("bulk");
        let first = root.join("first");
        let third = root.join("third");
        init_repo_at(&first);
        init_repo_at(&third);
        fs::write(first.join("README.md"), "dirty\n").expect("dirty first");
        fs::write(third.join("README.md"), "dirty\n").expect("dirty third");

        let orchestrator = BulkOrchestrator::new(context(&root), 2);
        let results = orchestrator
            .run_bulk(
                vec![repo(&first), repo(&root.join("missing")), repo(&third)],
                ActionKind::Discard,
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].target.path.as_deref(), Some(first.as_path()));
        assert_eq!(results[1].target.label, "missing");
        assert_eq!(results[2].target.path.as_deref(), Some(third.as_path()));
        assert_eq!(results[0].outcome, Outcome::Succeeded);
        assert_eq!(results[1].outcome, Outcome::Failed);
        assert!(results[1].detail.contains("repository not found"));
        assert_eq!(results[2].outcome, Outcome::Succeeded);
        assert!(results.iter().all(|result| result.action == ActionKind::Discard));
        assert_eq!(fs::read_to_string(third.join("README.md")).expect("read"), "init\n");

        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn wrong_target_kind_yields_failed_result() {
        let root = unique_temp_dir("bulk-kind");
        let orchestrator = BulkOrchestrator::new(context(&root), 1);
        let results = orchestrator
            .run_bulk(vec![repo(&root)], ActionKind::OpenInBrowser)
            .await;
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert!(results[0].detail.contains("review requests"));
        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn ineligible_targets_are_skipped_when_asked() {
        let root = unique_temp_dir("bulk-skip");
        let orchestrator = BulkOrchestrator::new(context(&root), 1);
        let handle = orchestrator.start(
            vec![repo(&root)],
            ActionKind::Stash,
            BulkOptions {
                skip_ineligible: true,
            },
        );
        let results = handle.wait().await;
        assert_eq!(results[0].outcome, Outcome::Skipped);
        assert_eq!(results[0].detail, "state unknown (not classified yet)");
        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancelled_targets_report_cancelled() {
        let root = unique_temp_dir("bulk-cancel");
        let git = GitCli::with_gateway(Arc::new(SlowGateway));
        let (ctx, _browser) = context_with(git, ScriptedGateway::new(), &root);
        let orchestrator = BulkOrchestrator::new(ctx, 4);

        let handle = orchestrator.start(
            vec![repo(&root.join("missing")), repo(&root)],
            ActionKind::Fetch,
            BulkOptions::default(),
        );
        assert_eq!(handle.len(), 2);
        assert!(handle.cancel(1));
        assert!(!handle.cancel(7));
        let results = handle.wait().await;
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert_eq!(results[1].outcome, Outcome::Cancelled);
        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancel_all_interrupts_running_commands() {
        let root = unique_temp_dir("bulk-cancel-all");
        let git = GitCli::with_gateway(Arc::new(SlowGateway));
        let (ctx, _browser) = context_with(git, ScriptedGateway::new(), &root);
        let orchestrator = BulkOrchestrator::new(ctx, 4);

        let handle = orchestrator.start(vec![repo(&root), repo(&root)], ActionKind::Pull, BulkOptions::default());
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel_all();
        let results = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("cancellation is prompt");
        assert!(results
            .iter()
            .all(|result| result.outcome == Outcome::Cancelled));
        let _ = fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn panicking_recipe_becomes_failed_result() {
        let root = unique_temp_dir("bulk-panic");
        let git = GitCli::with_gateway(Arc::new(PanickingGateway));
        let (ctx, _browser) = context_with(git, ScriptedGateway::new(), &root);
        let orchestrator = BulkOrchestrator::new(ctx, 1);

        let results = orchestrator
            .run_bulk(vec![repo(&root), repo(&root.join("missing"))], ActionKind::Discard)
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, Outcome::Failed);
        assert_eq!(results[0].detail, "recipe panicked");
        assert_eq!(results[1].outcome, Outcome::Failed);
        assert!(results[1].detail.contains("repository not found"));
        let _ = fs::remove_dir_all(&root);
    }
}
