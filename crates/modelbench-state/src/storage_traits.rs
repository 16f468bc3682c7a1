//! Storage trait definitions for benchmark runs
//!
//! `RunStore` is the persistence contract for completed [`BenchmarkRun`]s.
//! It is async and backend-agnostic; an in-memory fake lives in the `fakes`
//! module, durable backends in `surreal_store` and `fs_store`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::fs_store::FsRunStore;
use crate::surreal_store::SurrealRunStore;
use crate::record::{BenchmarkRun, RunId, RunSummary};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Benchmark run store.
///
/// Guarantees:
/// - Runs are write-once: `save` fails with `DuplicateRun` for a known id,
///   and no update or delete is exposed.
/// - `get(run.id)` after `save(run)` returns a value equal to `run`.
/// - `list` is ordered newest-first by run timestamp.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a completed run.
    async fn save(&self, run: &BenchmarkRun) -> StorageResult<()>;

    /// Retrieve a run by id. Returns `StorageError::RunNotFound` if absent.
    async fn get(&self, run_id: &RunId) -> StorageResult<BenchmarkRun>;

    /// Summaries of every stored run, newest first.
    async fn list(&self) -> StorageResult<Vec<RunSummary>>;

    /// Summaries of runs whose input has the given digest, newest first.
    async fn list_by_input(&self, input_digest: &str) -> StorageResult<Vec<RunSummary>>;
}

/// Sort summaries newest-first, breaking timestamp ties by id.
pub(crate) fn newest_first(summaries: &mut [RunSummary]) {
    summaries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

/// Open the backend a store URL names.
///
/// `file://<dir>` selects [`FsRunStore`]; anything else (`mem://`,
/// `surrealkv://<path>`, remote endpoints) is handed to SurrealDB.
pub async fn open_run_store(url: &str) -> StorageResult<Arc<dyn RunStore>> {
    if let Some(dir) = url.strip_prefix("file://") {
        return Ok(Arc::new(FsRunStore::new(dir)?));
    }
    Ok(Arc::new(SurrealRunStore::connect(url).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_run_store_selects_backend_by_scheme() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("file://{}", dir.path().display());
        let store = open_run_store(&url).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
        assert!(dir.path().join("runs").is_dir());

        let store = open_run_store("mem://").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }
}
