//! modelbench-state: persistence layer for benchmark runs
//!
//! Defines the persisted record schema (model configurations, attempt results,
//! benchmark runs, isolation snapshots) and the `RunStore` contract with its
//! backends.
//!
//! ## Key Components
//!
//! - `record`: `ModelConfig`, `RunConfig`, `AttemptResult`, `BenchmarkRun`, ...
//! - `RunStore`: write-once run persistence (save / get / list)
//! - `SurrealRunStore`: SurrealDB backend (in-memory or embedded `surrealkv`)
//! - `FsRunStore`: one JSON document per run on disk
//! - `fakes::MemoryRunStore`: in-process store for tests

mod error;
pub mod fakes;
mod fs_store;
mod migrations;
pub mod record;
pub mod storage_traits;
mod surreal_store;

pub use error::{ConfigError, StorageError};
pub use fs_store::FsRunStore;
pub use record::{
    input_digest, AttemptResult, BenchmarkRun, CommitInfo, ExecutionAttempt, InnerAttempt,
    IsolationSnapshot, ModelConfig, RepoState, RunConfig, RunId, RunSummary, SnapshotCapture,
    TokenUsage, VerificationResult,
};
pub use storage_traits::{open_run_store, RunStore, StorageResult};
pub use surreal_store::{SurrealRunStore, DEFAULT_STORE_URL, STORE_URL_ENV};
