//! Error types for modelbench-state

use thiserror::Error;

/// Errors raised while constructing benchmark configuration records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A model id string could not be parsed
    #[error("invalid model id '{id}': {reason}")]
    InvalidModelId { id: String, reason: String },

    /// Two model configurations render to the same id
    #[error("duplicate model configuration: {0}")]
    DuplicateModel(String),

    /// Concurrency must be at least one
    #[error("concurrency must be >= 1")]
    ZeroConcurrency,

    /// The retry loop needs at least one pass
    #[error("max retries must be >= 1")]
    ZeroRetries,
}

/// Errors that can occur in the run persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No run stored under the given id
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Runs are write-once; the id is already taken
    #[error("run already stored: {run_id}")]
    DuplicateRun { run_id: String },

    /// Backend connection or query failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored document could not be decoded
    #[error("invalid stored record: {0}")]
    InvalidRecord(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
