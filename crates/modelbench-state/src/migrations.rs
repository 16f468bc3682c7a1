//! SurrealDB schema initialization
//!
//! Sets up the `runs` table with its indexes. Safe to call on every
//! connection: every statement is `IF NOT EXISTS`.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all modelbench tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing modelbench SurrealDB schema");
    init_runs_table(db).await?;
    info!("modelbench schema initialization complete");
    Ok(())
}

/// Initialize `runs` table with constraints and indexes
///
/// Schema:
/// ```text
/// TABLE runs {
///   run_id:        STRING (unique)
///   operation:     STRING (indexed)
///   input_digest:  STRING (indexed)
///   created_at:    STRING (RFC 3339, fixed width, indexed)
///   model_count:   INT
///   failures:      INT
///   document:      STRING (full BenchmarkRun JSON)
/// }
/// ```
///
/// Rows are never updated or deleted.
async fn init_runs_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_operation ON TABLE runs COLUMNS operation;
        DEFINE INDEX IF NOT EXISTS idx_input_digest ON TABLE runs COLUMNS input_digest;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE runs COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    debug!("runs table initialized");
    Ok(())
}
