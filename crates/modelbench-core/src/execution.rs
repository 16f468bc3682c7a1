//! Execution benchmarks: code-changing work run under git isolation.
//!
//! Each model gets its own isolation branch cut from the branch that was
//! checked out when its attempt began. The work runs through a retry loop,
//! verification commands decide pass/fail, and the original branch is checked
//! out again before the next model starts. Attempts never overlap: a
//! `tokio::sync::Mutex<()>` guards the checkout-to-checkout-back span.
//!
//! Uncommitted changes present when an attempt begins are stashed before the
//! isolation branch is cut and re-applied after the checkout back, so they
//! never reach an isolation branch or an auto-commit. Whatever the attempt
//! leaves uncommitted is stashed on the isolation branch before returning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelbench_state::{ConfigError, RunStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::Instrument;

use crate::collector::{Measured, MetricsCollector, OperationOutput, StreamSink};
use crate::dispatcher::settle;
use crate::domain::{
    AttemptResult, BenchError, BenchmarkRun, CommitInfo, ExecutionAttempt,
    InnerAttempt, IsolationSnapshot, ModelConfig, ProgressEvent, ProgressSink, Result, RunConfig,
    RunId, SnapshotCapture, VerificationResult,
};
use crate::git::{isolation_branch_name, GitRepo};
use crate::metrics::METRICS;
use crate::obs;
use crate::verify;

/// Operation label recorded on single-task runs.
pub const EXECUTE_TASK: &str = "execute-task";
/// Operation label recorded on loop runs.
pub const EXECUTE_LOOP: &str = "execute-loop";

const CALLER_STASH_MESSAGE: &str = "modelbench: uncommitted changes before attempt";
const LEFTOVER_STASH_MESSAGE: &str = "modelbench: leftover attempt changes";

/// Default bound on retry-loop passes.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What one attempt executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkUnit {
    /// A single task, identified by the caller's reference.
    Task { task_ref: String },
    /// A multi-task loop, configured by opaque options.
    Loop { loop_options: Value },
}

impl WorkUnit {
    fn label(&self) -> &str {
        match self {
            WorkUnit::Task { task_ref } => task_ref,
            WorkUnit::Loop { .. } => "loop",
        }
    }
}

/// Per-pass context handed to the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptContext {
    /// 1-based retry-loop counter.
    pub attempt_number: u32,
    /// Escalation model replacing the base model for this pass.
    pub model_override: Option<ModelConfig>,
    /// Isolation branch the pass runs on.
    pub branch_name: String,
}

impl AttemptContext {
    /// Model this pass should run under.
    pub fn effective_model<'a>(&'a self, base: &'a ModelConfig) -> &'a ModelConfig {
        self.model_override.as_ref().unwrap_or(base)
    }
}

/// Escalation entry for a retry-loop pass.
///
/// Pass 1 uses the base model. Pass `n >= 2` uses `try_models[n - 2]`; once
/// the list is exhausted the base model is used again.
pub fn escalation_model(attempt_number: u32, try_models: &[ModelConfig]) -> Option<&ModelConfig> {
    let index = attempt_number.checked_sub(2)?;
    try_models.get(index as usize)
}

/// Runs a unit of work against the checked-out working tree.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        work: &WorkUnit,
        model: &ModelConfig,
        ctx: &AttemptContext,
        stream: StreamSink,
    ) -> anyhow::Result<OperationOutput>;
}

/// Options for [`ExecutionBenchmark::run_execution_benchmark`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOptions {
    pub task_ref: String,
    /// Shell commands run in order after each pass; first failure fails the pass.
    pub verification_commands: Vec<String>,
    pub max_retries: u32,
    pub keep_branches: bool,
    /// Commit pending changes on the isolation branch before judging success.
    pub auto_commit: bool,
    /// Escalation list consumed by passes 2, 3, ...
    pub try_models: Vec<ModelConfig>,
    pub verification_timeout: Option<Duration>,
}

impl ExecutionOptions {
    pub fn new(task_ref: impl Into<String>) -> Self {
        Self {
            task_ref: task_ref.into(),
            verification_commands: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            keep_branches: false,
            auto_commit: false,
            try_models: Vec::new(),
            verification_timeout: None,
        }
    }

    fn policy(&self) -> AttemptPolicy {
        AttemptPolicy {
            verification_commands: self.verification_commands.clone(),
            max_retries: self.max_retries,
            keep_branches: self.keep_branches,
            auto_commit: self.auto_commit,
            try_models: self.try_models.clone(),
            verification_timeout: self.verification_timeout,
        }
    }
}

/// Options for [`ExecutionBenchmark::run_execute_loop_benchmark`].
///
/// The loop drives its own task sequence, so each model gets a single pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopBenchmarkOptions {
    pub loop_options: Value,
    pub keep_branches: bool,
    pub auto_commit: bool,
    pub verification_commands: Vec<String>,
    pub verification_timeout: Option<Duration>,
}

impl LoopBenchmarkOptions {
    pub fn new(loop_options: Value) -> Self {
        Self {
            loop_options,
            keep_branches: false,
            auto_commit: false,
            verification_commands: Vec::new(),
            verification_timeout: None,
        }
    }

    fn policy(&self) -> AttemptPolicy {
        AttemptPolicy {
            verification_commands: self.verification_commands.clone(),
            max_retries: 1,
            keep_branches: self.keep_branches,
            auto_commit: self.auto_commit,
            try_models: Vec::new(),
            verification_timeout: self.verification_timeout,
        }
    }
}

struct AttemptPolicy {
    verification_commands: Vec<String>,
    max_retries: u32,
    keep_branches: bool,
    auto_commit: bool,
    try_models: Vec<ModelConfig>,
    verification_timeout: Option<Duration>,
}

/// Outcome of the retry loop.
struct RetryOutcome {
    final_pass: Option<Measured>,
    final_model_id: String,
    verification: Vec<VerificationResult>,
    error: Option<String>,
    attempts: Vec<InnerAttempt>,
}

/// Serialized, git-isolated benchmark engine.
pub struct ExecutionBenchmark {
    repo: GitRepo,
    executor: Arc<dyn TaskExecutor>,
    collector: MetricsCollector,
    store: Option<Arc<dyn RunStore>>,
    branch_prefix: String,
    worktree: Arc<Mutex<()>>,
}

impl ExecutionBenchmark {
    pub fn new(repo: GitRepo, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            repo,
            executor,
            collector: MetricsCollector::default(),
            store: None,
            branch_prefix: "bench".to_string(),
            worktree: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_collector(mut self, collector: MetricsCollector) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.branch_prefix = prefix.into();
        self
    }

    /// Share one working-tree lock between engines pointed at the same repo.
    pub fn with_worktree_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.worktree = lock;
        self
    }

    /// Benchmark one task across `config.models()`, one model at a time.
    ///
    /// Fails only on invalid options. Concurrency is pinned to 1.
    pub async fn run_execution_benchmark(
        &self,
        options: &ExecutionOptions,
        config: &RunConfig,
        progress: ProgressSink,
    ) -> Result<BenchmarkRun> {
        if options.task_ref.trim().is_empty() {
            return Err(BenchError::InvalidInput {
                operation: EXECUTE_TASK.to_string(),
            });
        }
        if options.max_retries == 0 {
            return Err(ConfigError::ZeroRetries.into());
        }

        let input = json!({
            "task_ref": options.task_ref,
            "verification_commands": options.verification_commands,
            "max_retries": options.max_retries,
            "keep_branches": options.keep_branches,
            "auto_commit": options.auto_commit,
            "try_models": options.try_models.iter().map(ModelConfig::id).collect::<Vec<_>>(),
        });
        let work = WorkUnit::Task {
            task_ref: options.task_ref.clone(),
        };
        self.run_serialized(EXECUTE_TASK, work, options.policy(), input, config, progress)
            .await
    }

    /// Benchmark a multi-task loop across `config.models()`, one model at a time.
    pub async fn run_execute_loop_benchmark(
        &self,
        options: &LoopBenchmarkOptions,
        config: &RunConfig,
        progress: ProgressSink,
    ) -> Result<BenchmarkRun> {
        let input = json!({
            "loop_options": options.loop_options,
            "keep_branches": options.keep_branches,
            "auto_commit": options.auto_commit,
            "verification_commands": options.verification_commands,
        });
        let work = WorkUnit::Loop {
            loop_options: options.loop_options.clone(),
        };
        self.run_serialized(EXECUTE_LOOP, work, options.policy(), input, config, progress)
            .await
    }

    async fn run_serialized(
        &self,
        operation: &str,
        work: WorkUnit,
        policy: AttemptPolicy,
        input: Value,
        config: &RunConfig,
        progress: ProgressSink,
    ) -> Result<BenchmarkRun> {
        let config = config.serialized();
        let run_id = RunId::new();
        let span = obs::run_span(&run_id.0, operation);
        let started = Instant::now();
        obs::emit_run_started(&run_id.0, operation, config.models().len(), 1);

        let mut results = Vec::with_capacity(config.models().len());
        for (index, model) in config.models().iter().enumerate() {
            let result = self
                .isolated_attempt(&run_id, index + 1, model, &work, &policy, &progress)
                .instrument(span.clone())
                .await;
            results.push(result);
        }

        let run = BenchmarkRun::new(run_id, operation, input, config, results);
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&run).await {
                obs::emit_run_persist_error(&run.id.0, &e);
            }
        }

        obs::emit_run_finished(
            &run.id.0,
            started.elapsed().as_millis() as u64,
            run.results.len(),
            run.failure_count(),
        );
        METRICS.flush();
        Ok(run)
    }

    async fn isolated_attempt(
        &self,
        run_id: &RunId,
        index: usize,
        model: &ModelConfig,
        work: &WorkUnit,
        policy: &AttemptPolicy,
        progress: &ProgressSink,
    ) -> AttemptResult {
        let _worktree = self.worktree.lock().await;
        let run = run_id.0.as_str();
        let model_id = model.id();
        let started = Instant::now();

        let before = self.repo.capture_state().await;
        if let SnapshotCapture::Unavailable { reason } = &before {
            obs::emit_housekeeping_failure(run, "snapshot.before", reason);
        }

        METRICS.inc_attempts_started();
        obs::emit_attempt_started(run, &model_id);
        progress.emit(ProgressEvent::Start {
            model_id: model_id.clone(),
        });

        let branch = isolation_branch_name(&self.branch_prefix, run_id.short(), &model_id, index);
        let mut record = ExecutionAttempt {
            attempt_number: 0,
            success: false,
            branch_name: branch.clone(),
            model_id: model_id.clone(),
            verification: Vec::new(),
            commit: None,
            has_new_commits: None,
            snapshot: IsolationSnapshot {
                before: before.clone(),
                after: before.clone(),
            },
            attempts: Vec::new(),
            branch_kept: false,
            cleanup_error: None,
        };

        let original = match self.repo.current_branch().await {
            Ok(name) => name,
            Err(e) => {
                let error = format!("cannot determine starting branch: {e}");
                return self.finish(run, &model_id, error, record, started, progress);
            }
        };
        let caller_stashed = match self.repo.stash_changes(CALLER_STASH_MESSAGE).await {
            Ok(stashed) => stashed,
            Err(e) => {
                let error = format!("cannot set aside uncommitted changes: {e}");
                return self.finish(run, &model_id, error, record, started, progress);
            }
        };
        if let Err(e) = self.repo.create_branch(&branch, &original).await {
            let mut error = format!("failed to create isolation branch {branch}: {e}");
            if caller_stashed {
                if let Err(pop) = self.repo.stash_pop(0).await {
                    error.push_str(&format!("; uncommitted changes left in stash: {pop}"));
                }
            }
            return self.finish(run, &model_id, error, record, started, progress);
        }
        METRICS.inc_branches_created();

        let outcome = self.retry_loop(model, work, policy, &branch, progress).await;
        let mut error = outcome.error.clone();

        if policy.auto_commit {
            let message = format!("bench({model_id}): {}", work.label());
            match self.repo.auto_commit(&message).await {
                Ok(commit) => record.commit = commit,
                Err(e) => {
                    error.get_or_insert_with(|| format!("auto-commit failed: {e}"));
                }
            }
        }

        record.has_new_commits = match before.revision() {
            Some(revision) => match self.repo.has_new_commits_since(revision).await {
                Ok(found) => Some(found),
                Err(e) => {
                    obs::emit_housekeeping_failure(run, "new_commit_check", &e);
                    None
                }
            },
            None => None,
        };
        record.snapshot.after = self.repo.capture_state().await;
        if let SnapshotCapture::Unavailable { reason } = &record.snapshot.after {
            obs::emit_housekeeping_failure(run, "snapshot.after", reason);
        }

        match self.restore(run, &original).await {
            Ok(leftovers_stashed) if caller_stashed => {
                // Attempt leftovers, when stashed, sit above the caller's entry.
                let index = usize::from(leftovers_stashed);
                if let Err(e) = self.repo.stash_pop(index).await {
                    error.get_or_insert_with(|| {
                        format!("failed to re-apply uncommitted changes (kept in stash): {e}")
                    });
                }
            }
            Ok(_) => {}
            Err(e) => {
                error.get_or_insert_with(|| format!("failed to restore branch {original}: {e}"));
            }
        }

        if policy.keep_branches {
            record.branch_kept = true;
        } else {
            match self.repo.delete_branch(&branch).await {
                Ok(()) => METRICS.inc_branches_cleaned(),
                Err(e) => {
                    obs::emit_housekeeping_failure(run, "branch.cleanup", &e);
                    record.cleanup_error = Some(e.to_string());
                    record.branch_kept = true;
                }
            }
        }

        record.attempt_number = outcome.attempts.len() as u32;
        record.model_id = outcome.final_model_id;
        record.verification = outcome.verification;
        record.attempts = outcome.attempts;
        record.success = error.is_none();

        let mut result = match (outcome.final_pass, error) {
            (Some(measured @ Measured::Completed { .. }), None) => {
                measured.into_attempt_result(&model_id)
            }
            (Some(Measured::Completed { metrics, .. }), Some(error)) => {
                let mut result = AttemptResult::failed(&model_id, error, Duration::ZERO);
                metrics.apply(&mut result);
                result
            }
            (_, error) => AttemptResult::failed(
                &model_id,
                error.unwrap_or_else(|| "attempt produced no result".to_string()),
                Duration::ZERO,
            ),
        };
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.execution = Some(record);

        settle(run, &result, progress);
        result
    }

    /// Run the work until a pass verifies or `max_retries` passes are spent.
    async fn retry_loop(
        &self,
        model: &ModelConfig,
        work: &WorkUnit,
        policy: &AttemptPolicy,
        branch: &str,
        progress: &ProgressSink,
    ) -> RetryOutcome {
        let row_id = model.id();
        let mut outcome = RetryOutcome {
            final_pass: None,
            final_model_id: row_id.clone(),
            verification: Vec::new(),
            error: None,
            attempts: Vec::new(),
        };

        for attempt_number in 1..=policy.max_retries {
            if attempt_number > 1 {
                METRICS.inc_retries();
            }
            let ctx = AttemptContext {
                attempt_number,
                model_override: escalation_model(attempt_number, &policy.try_models).cloned(),
                branch_name: branch.to_string(),
            };
            let pass_model = ctx.effective_model(model).clone();
            let pass_started = Instant::now();

            let executor = &self.executor;
            let measured = self
                .collector
                .measure(&row_id, &pass_model, progress.clone(), |sink| {
                    executor.execute(work, &pass_model, &ctx, sink)
                })
                .await;

            let (verification, error) = match &measured {
                Measured::Completed { .. } => {
                    let verification = verify::run_all(
                        &policy.verification_commands,
                        self.repo.dir(),
                        policy.verification_timeout,
                    )
                    .await;
                    let error = verification
                        .iter()
                        .find(|v| !v.passed)
                        .map(|v| format!("verification failed: {}", v.command));
                    (verification, error)
                }
                Measured::Failed { error, .. } => (Vec::new(), Some(format!("{error:#}"))),
            };

            tracing::debug!(
                model_id = %row_id,
                pass_model = %pass_model,
                attempt = attempt_number,
                success = error.is_none(),
                "retry pass finished"
            );
            outcome.attempts.push(InnerAttempt {
                attempt_number,
                model_id: pass_model.id(),
                success: error.is_none(),
                error: error.clone(),
                verification: verification.clone(),
                duration_ms: pass_started.elapsed().as_millis() as u64,
            });
            outcome.final_pass = Some(measured);
            outcome.final_model_id = pass_model.id();
            outcome.verification = verification;
            outcome.error = error;

            if outcome.error.is_none() {
                break;
            }
        }
        outcome
    }

    /// Stash the attempt's leftovers, then check out `original` again.
    ///
    /// Returns whether a leftover stash entry was created.
    async fn restore(&self, run: &str, original: &str) -> Result<bool> {
        let leftovers = match self.repo.stash_changes(LEFTOVER_STASH_MESSAGE).await {
            Ok(stashed) => stashed,
            Err(e) => {
                obs::emit_housekeeping_failure(run, "stash", &e);
                false
            }
        };
        self.repo.restore(original).await?;
        Ok(leftovers)
    }

    fn finish(
        &self,
        run: &str,
        model_id: &str,
        error: String,
        record: ExecutionAttempt,
        started: Instant,
        progress: &ProgressSink,
    ) -> AttemptResult {
        let mut result = AttemptResult::failed(model_id, error, started.elapsed());
        result.execution = Some(record);
        settle(run, &result, progress);
        result
    }
}

/// Commit made during an attempt, if any.
pub fn attempt_commit(result: &AttemptResult) -> Option<&CommitInfo> {
    result.execution.as_ref()?.commit.as_ref()
}
