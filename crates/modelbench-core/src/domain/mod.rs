//! Domain models for modelbench.
//!
//! Persisted records (`ModelConfig`, `RunConfig`, `AttemptResult`,
//! `BenchmarkRun`, ...) live in `modelbench_state::record` and are re-exported
//! here next to the in-process types:
//! - `ProgressEvent` / `ProgressSink`: observational event stream
//! - `BenchError`: validation and infrastructure errors

pub mod error;
pub mod progress;

pub use error::{BenchError, Result};
pub use modelbench_state::record::*;
pub use progress::{ProgressEvent, ProgressSink};
