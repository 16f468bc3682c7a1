//! ModelBench Core Library
//!
//! Benchmark execution engine: runs one operation across a matrix of model
//! configurations and records comparable metrics.
//!
//! - [`OperationRegistry`]: operation id to adapter (validator + callable)
//! - [`BenchmarkDispatcher`]: bounded-concurrency fan-out for provider calls
//! - [`ExecutionBenchmark`]: serialized, git-isolated runs with retry/escalation
//! - [`MetricsCollector`]: duration, time-to-first-unit, throughput, cost
//! - [`GitRepo`]: isolation branches, snapshots, auto-commit
//! - Run persistence lives in `modelbench_state`

pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod execution;
pub mod git;
pub mod metrics;
pub mod obs;
pub mod registry;
pub mod report;
pub mod telemetry;
pub mod verify;

pub use collector::{
    AttemptMetrics, CostEstimator, Measured, MetricsCollector, ModelPrice, OperationOutput,
    PricingTable, StreamSink,
};
pub use config::BenchSettings;
pub use dispatcher::BenchmarkDispatcher;
pub use domain::{BenchError, ProgressEvent, ProgressSink, Result};
pub use execution::{
    attempt_commit, escalation_model, AttemptContext, ExecutionBenchmark, ExecutionOptions,
    LoopBenchmarkOptions, TaskExecutor, WorkUnit, EXECUTE_LOOP, EXECUTE_TASK,
};
pub use git::{isolation_branch_name, sanitize_branch_component, GitRepo};
pub use metrics::METRICS;
pub use obs::{
    emit_attempt_finished, emit_attempt_started, emit_housekeeping_failure,
    emit_run_finished, emit_run_persist_error, emit_run_started, run_span,
};
pub use registry::{FnOperation, Operation, OperationDescriptor, OperationKind, OperationRegistry};
pub use report::{write_report_md, ReportRow, RunReport};
pub use telemetry::init_tracing;

pub use modelbench_state::{
    open_run_store, AttemptResult, BenchmarkRun, ConfigError, ExecutionAttempt, FsRunStore,
    ModelConfig, RunConfig, RunId, RunStore, RunSummary, StorageError, SurrealRunStore,
    TokenUsage,
};
