//! Global atomic counters for benchmark activity.
//!
//! Counters are bumped silently at the call site. [`Metrics::flush`] emits the
//! current values as one `info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lock-free counters.
pub struct Metrics {
    attempts_started: AtomicU64,
    attempts_succeeded: AtomicU64,
    attempts_failed: AtomicU64,
    retries: AtomicU64,
    branches_created: AtomicU64,
    branches_cleaned: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            attempts_started: AtomicU64::new(0),
            attempts_succeeded: AtomicU64::new(0),
            attempts_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            branches_created: AtomicU64::new(0),
            branches_cleaned: AtomicU64::new(0),
        }
    }

    pub fn inc_attempts_started(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "attempts_started", "counter incremented");
    }

    /// Record a settled attempt.
    pub fn record_attempt(&self, success: bool) {
        let (counter, name) = if success {
            (&self.attempts_succeeded, "attempts_succeeded")
        } else {
            (&self.attempts_failed, "attempts_failed")
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = name, "counter incremented");
    }

    /// A retry-loop pass after the first.
    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    pub fn inc_branches_created(&self) {
        self.branches_created.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "branches_created", "counter incremented");
    }

    pub fn inc_branches_cleaned(&self) {
        self.branches_cleaned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "branches_cleaned", "counter incremented");
    }

    /// Emit all counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            attempts_started = self.attempts_started(),
            attempts_succeeded = self.attempts_succeeded(),
            attempts_failed = self.attempts_failed(),
            retries = self.retries(),
            branches_created = self.branches_created(),
            branches_cleaned = self.branches_cleaned(),
        );
    }

    pub fn attempts_started(&self) -> u64 {
        self.attempts_started.load(Ordering::Relaxed)
    }

    pub fn attempts_succeeded(&self) -> u64 {
        self.attempts_succeeded.load(Ordering::Relaxed)
    }

    pub fn attempts_failed(&self) -> u64 {
        self.attempts_failed.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn branches_created(&self) -> u64 {
        self.branches_created.load(Ordering::Relaxed)
    }

    pub fn branches_cleaned(&self) -> u64 {
        self.branches_cleaned.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.attempts_started,
            &self.attempts_succeeded,
            &self.attempts_failed,
            &self.retries,
            &self.branches_created,
            &self.branches_cleaned,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
