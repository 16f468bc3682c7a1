//! In-memory fake for the run store (testing only)
//!
//! `MemoryRunStore` satisfies the `RunStore` contract without any external
//! dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{BenchmarkRun, RunId, RunSummary};
use crate::storage_traits::{newest_first, RunStore, StorageResult};

/// In-memory run store backed by a `HashMap<RunId, BenchmarkRun>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<RunId, BenchmarkRun>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub fn len(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StorageResult<std::sync::MutexGuard<'_, HashMap<RunId, BenchmarkRun>>> {
        self.runs
            .lock()
            .map_err(|e| StorageError::Backend(format!("run store lock poisoned: {e}")))
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn save(&self, run: &BenchmarkRun) -> StorageResult<()> {
        let mut runs = self.lock()?;
        if runs.contains_key(&run.id) {
            return Err(StorageError::DuplicateRun {
                run_id: run.id.to_string(),
            });
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> StorageResult<BenchmarkRun> {
        let runs = self.lock()?;
        runs.get(run_id)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn list(&self) -> StorageResult<Vec<RunSummary>> {
        let runs = self.lock()?;
        let mut summaries: Vec<RunSummary> = runs.values().map(BenchmarkRun::summary).collect();
        newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn list_by_input(&self, input_digest: &str) -> StorageResult<Vec<RunSummary>> {
        let runs = self.lock()?;
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.input_digest == input_digest)
            .map(BenchmarkRun::summary)
            .collect();
        newest_first(&mut summaries);
        Ok(summaries)
    }
}
