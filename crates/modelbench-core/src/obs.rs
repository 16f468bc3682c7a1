//! Structured lifecycle events for benchmark runs.
//!
//! All events are `info!` unless they report a swallowed failure. Filter with
//! `RUST_LOG`; switch to JSON with `MODELBENCH_LOG_FORMAT=json`.

use tracing::{info, warn, Span};

/// Span grouping every log line of one run.
///
/// Attach it to the run's futures with `tracing::Instrument::instrument`.
pub fn run_span(run_id: &str, operation: &str) -> Span {
    tracing::info_span!("bench.run", run_id = %run_id, operation = %operation)
}

pub fn emit_run_started(run_id: &str, operation: &str, model_count: usize, concurrency: usize) {
    info!(
        event = "bench.run.started",
        run_id = %run_id,
        operation = %operation,
        model_count = model_count,
        concurrency = concurrency,
    );
}

pub fn emit_attempt_started(run_id: &str, model_id: &str) {
    info!(event = "bench.attempt.started", run_id = %run_id, model_id = %model_id);
}

/// Attempt settled. `error` is None on success.
pub fn emit_attempt_finished(run_id: &str, model_id: &str, duration_ms: u64, error: Option<&str>) {
    match error {
        None => info!(
            event = "bench.attempt.finished",
            run_id = %run_id,
            model_id = %model_id,
            duration_ms = duration_ms,
            success = true,
        ),
        Some(error) => info!(
            event = "bench.attempt.finished",
            run_id = %run_id,
            model_id = %model_id,
            duration_ms = duration_ms,
            success = false,
            error = %error,
        ),
    }
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, model_count: usize, failures: usize) {
    info!(
        event = "bench.run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        model_count = model_count,
        failures = failures,
    );
}

/// A best-effort step failed and the run carried on (snapshot capture,
/// branch cleanup, restore fallback).
pub fn emit_housekeeping_failure(run_id: &str, step: &str, error: &dyn std::fmt::Display) {
    warn!(
        event = "bench.housekeeping_failed",
        run_id = %run_id,
        step = %step,
        error = %error,
    );
}

/// The finished run could not be written to the store.
pub fn emit_run_persist_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "bench.run.persist_error", run_id = %run_id, error = %error);
}
