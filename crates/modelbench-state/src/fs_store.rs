use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::record::{BenchmarkRun, RunId, RunSummary};
use crate::storage_traits::{newest_first, RunStore, StorageResult};

/// Filesystem-backed run store: one pretty-printed JSON document per run.
///
/// Layout: `<root>/runs/<run_id>.json`
pub struct FsRunStore {
    runs_dir: PathBuf,
}

impl FsRunStore {
    /// Create a new `FsRunStore` rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    fn run_path(&self, run_id: &RunId) -> StorageResult<PathBuf> {
        let valid = !run_id.0.is_empty()
            && run_id
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StorageError::InvalidRecord(format!(
                "run id not usable as a file name: {run_id}"
            )));
        }
        Ok(self.runs_dir.join(format!("{}.json", run_id.0)))
    }

    fn read_all(&self) -> StorageResult<Vec<BenchmarkRun>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let run: BenchmarkRun = serde_json::from_slice(&bytes).map_err(|e| {
                StorageError::InvalidRecord(format!("{}: {e}", path.display()))
            })?;
            runs.push(run);
        }
        Ok(runs)
    }

    fn summarize<'a>(runs: impl Iterator<Item = &'a BenchmarkRun>) -> Vec<RunSummary> {
        let mut summaries: Vec<RunSummary> = runs.map(BenchmarkRun::summary).collect();
        newest_first(&mut summaries);
        summaries
    }
}

#[async_trait]
impl RunStore for FsRunStore {
    async fn save(&self, run: &BenchmarkRun) -> StorageResult<()> {
        let path = self.run_path(&run.id)?;
        if path.exists() {
            return Err(StorageError::DuplicateRun {
                run_id: run.id.to_string(),
            });
        }

        let bytes = serde_json::to_vec_pretty(run)?;

        // Atomic write: temp file in the same directory, then a no-clobber persist.
        let mut tmp = NamedTempFile::new_in(&self.runs_dir)?;
        tmp.write_all(&bytes)?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                StorageError::DuplicateRun {
                    run_id: run.id.to_string(),
                }
            } else {
                StorageError::Io(e.error)
            }
        })?;
        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> StorageResult<BenchmarkRun> {
        let path = self.run_path(run_id)?;
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self) -> StorageResult<Vec<RunSummary>> {
        let runs = self.read_all()?;
        Ok(Self::summarize(runs.iter()))
    }

    async fn list_by_input(&self, input_digest: &str) -> StorageResult<Vec<RunSummary>> {
        let runs = self.read_all()?;
        Ok(Self::summarize(
            runs.iter().filter(|run| run.input_digest == input_digest),
        ))
    }
}
