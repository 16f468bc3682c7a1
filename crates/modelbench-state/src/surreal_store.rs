//! SurrealDB-backed RunStore implementation
//!
//! Each run is one row in `runs`. Listing columns are stored alongside the
//! full run serialized as a JSON string, so `get` returns exactly what was
//! saved regardless of how SurrealDB would coerce nested values.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::migrations;
use crate::record::{BenchmarkRun, RunId, RunSummary};
use crate::storage_traits::{newest_first, RunStore, StorageResult};

const NAMESPACE: &str = "modelbench";

/// Environment variable naming the store URL.
pub const STORE_URL_ENV: &str = "MODELBENCH_STORE";
/// Store URL used when `MODELBENCH_STORE` is unset.
pub const DEFAULT_STORE_URL: &str = "surrealkv://.modelbench/db";
const DATABASE: &str = "main";

const SELECT_COLUMNS: &str =
    "SELECT run_id, operation, input_digest, created_at, model_count, failures, document FROM runs";

/// Row shape of the `runs` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRun {
    run_id: String,
    operation: String,
    input_digest: String,
    created_at: String,
    model_count: i64,
    failures: i64,
    document: String,
}

impl DbRun {
    fn from_run(run: &BenchmarkRun) -> StorageResult<Self> {
        Ok(Self {
            run_id: run.id.0.clone(),
            operation: run.operation.clone(),
            input_digest: run.input_digest.clone(),
            created_at: run.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            model_count: run.results.len() as i64,
            failures: run.failure_count() as i64,
            document: serde_json::to_string(run)?,
        })
    }

    fn into_run(self) -> StorageResult<BenchmarkRun> {
        Ok(serde_json::from_str(&self.document)?)
    }

    fn summary(&self) -> StorageResult<RunSummary> {
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| {
                StorageError::InvalidRecord(format!(
                    "run {} has bad created_at '{}': {e}",
                    self.run_id, self.created_at
                ))
            })?
            .with_timezone(&Utc);
        Ok(RunSummary {
            id: RunId(self.run_id.clone()),
            timestamp,
            operation: self.operation.clone(),
            model_count: self.model_count.max(0) as usize,
            failures: self.failures.max(0) as usize,
        })
    }
}

/// SurrealDB-backed implementation of [`RunStore`].
pub struct SurrealRunStore {
    db: Surreal<Any>,
}

impl SurrealRunStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> StorageResult<Self> {
        Self::connect("mem://").await
    }

    /// Connect to any SurrealDB endpoint (`mem://`, `surrealkv://path`, `ws://host`).
    ///
    /// For `surrealkv://` the target directory is created if missing.
    pub async fn connect(url: &str) -> StorageResult<Self> {
        if let Some(path) = url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StorageError::Backend(format!(
                    "failed to create database directory {path}: {e}"
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Backend(format!("failed to connect to {url}: {e}")))?;

        db.use_ns(NAMESPACE).use_db(DATABASE).await?;

        migrations::init_schema(&db).await?;

        info!(url = %url, "SurrealRunStore connected");
        Ok(Self { db })
    }

    async fn fetch_rows(&self, filter: Option<(&str, String)>) -> StorageResult<Vec<DbRun>> {
        let mut res = match filter {
            Some((column, value)) => {
                let sql = format!("{SELECT_COLUMNS} WHERE {column} = $value");
                self.db.query(sql).bind(("value", value)).await?
            }
            None => self.db.query(SELECT_COLUMNS).await?,
        };
        let rows: Vec<DbRun> = res.take(0)?;
        Ok(rows)
    }

    fn summarize(rows: &[DbRun]) -> StorageResult<Vec<RunSummary>> {
        let mut summaries = rows
            .iter()
            .map(DbRun::summary)
            .collect::<StorageResult<Vec<_>>>()?;
        newest_first(&mut summaries);
        Ok(summaries)
    }
}

#[async_trait]
impl RunStore for SurrealRunStore {
    async fn save(&self, run: &BenchmarkRun) -> StorageResult<()> {
        let existing = self.fetch_rows(Some(("run_id", run.id.0.clone()))).await?;
        if !existing.is_empty() {
            return Err(StorageError::DuplicateRun {
                run_id: run.id.to_string(),
            });
        }

        debug!(run_id = %run.id, "saving run");
        let row = DbRun::from_run(run)?;
        self.db
            .query("CREATE runs CONTENT $row")
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn get(&self, run_id: &RunId) -> StorageResult<BenchmarkRun> {
        self.fetch_rows(Some(("run_id", run_id.0.clone())))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.to_string(),
            })?
            .into_run()
    }

    async fn list(&self) -> StorageResult<Vec<RunSummary>> {
        let rows = self.fetch_rows(None).await?;
        Self::summarize(&rows)
    }

    async fn list_by_input(&self, input_digest: &str) -> StorageResult<Vec<RunSummary>> {
        let rows = self
            .fetch_rows(Some(("input_digest", input_digest.to_string())))
            .await?;
        Self::summarize(&rows)
    }
}
