//! Domain-level error taxonomy for modelbench.
//!
//! Only configuration and validation failures surface as `Err` from the
//! dispatcher and the execution engine. Anything that goes wrong inside an
//! attempt is recorded on that attempt's `AttemptResult` instead.

use modelbench_state::{ConfigError, StorageError};

/// modelbench domain errors.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid input for operation {operation}")]
    InvalidInput { operation: String },

    #[error("invalid run configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid settings: {0}")]
    Settings(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Whether this error was raised before any attempt was scheduled.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BenchError::UnknownOperation(_)
                | BenchError::InvalidInput { .. }
                | BenchError::InvalidConfig(_)
        )
    }
}

/// Result type for modelbench domain operations.
pub type Result<T> = std::result::Result<T, BenchError>;
