//! Progress events streamed to the caller while a benchmark runs.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// One observation about an attempt.
///
/// Every event carries the model id of the row it belongs to, so events can be
/// correlated with `BenchmarkRun::results` regardless of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The attempt was launched.
    Start { model_id: String },

    /// A streamed output increment arrived.
    Progress {
        model_id: String,
        current_size_bytes: u64,
        current_bytes_per_second: f64,
    },

    /// The attempt settled successfully.
    Complete { model_id: String, duration_ms: u64 },

    /// The attempt settled with a failure.
    Error {
        model_id: String,
        duration_ms: u64,
        error: String,
    },
}

impl ProgressEvent {
    pub fn model_id(&self) -> &str {
        match self {
            ProgressEvent::Start { model_id }
            | ProgressEvent::Progress { model_id, .. }
            | ProgressEvent::Complete { model_id, .. }
            | ProgressEvent::Error { model_id, .. } => model_id,
        }
    }

    /// Whether this event settles its attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }
}

type Callback = dyn Fn(&ProgressEvent) + Send + Sync;

/// Fire-and-forget progress callback.
///
/// A panicking callback is caught and logged; it never aborts the run.
#[derive(Clone, Default)]
pub struct ProgressSink {
    callback: Option<Arc<Callback>>,
}

impl ProgressSink {
    /// A sink that drops every event.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(callback: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    /// A sink that forwards events into an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self::new(move |event| {
            // Receiver may be gone; progress is observational.
            let _ = tx.send(event.clone());
        });
        (sink, rx)
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(callback) = &self.callback else {
            return;
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
            warn!(
                event = "progress.callback_panicked",
                model_id = %event.model_id(),
                "progress callback panicked; event dropped"
            );
        }
    }
}

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink")
            .field("attached", &self.callback.is_some())
            .finish()
    }
}
