//! Benchmark dispatcher: one operation fanned out across model configurations.
//!
//! Attempts run under a bounded-concurrency policy. A semaphore caps the
//! number in flight; launches are additionally spaced by `RunConfig::delay`
//! measured from the previous launch. Each attempt writes only its own slot,
//! so `BenchmarkRun::results` is always in request order.

use std::sync::Arc;
use std::time::Duration;

use modelbench_state::RunStore;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::Instrument;

use crate::collector::MetricsCollector;
use crate::domain::{
    AttemptResult, BenchmarkRun, ModelConfig, ProgressEvent, ProgressSink, Result, RunConfig,
    RunId,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::registry::{Operation, OperationKind, OperationRegistry};

/// Runs registered operations across model configurations.
#[derive(Clone)]
pub struct BenchmarkDispatcher {
    registry: Arc<OperationRegistry>,
    collector: MetricsCollector,
    store: Option<Arc<dyn RunStore>>,
}

impl BenchmarkDispatcher {
    pub fn new(registry: Arc<OperationRegistry>) -> Self {
        Self {
            registry,
            collector: MetricsCollector::default(),
            store: None,
        }
    }

    pub fn with_collector(mut self, collector: MetricsCollector) -> Self {
        self.collector = collector;
        self
    }

    /// Persist every finished run to `store`.
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    /// Benchmark `operation_id` on `input` across `config.models()`.
    ///
    /// Fails only if the operation is unknown or rejects `input`; nothing is
    /// scheduled in that case. Otherwise returns once every attempt has
    /// settled, with one result per model in request order. Execution-kind
    /// operations are run one at a time regardless of `config.concurrency()`.
    pub async fn run(
        &self,
        operation_id: &str,
        input: Value,
        config: &RunConfig,
        progress: ProgressSink,
    ) -> Result<BenchmarkRun> {
        let operation = self.registry.resolve_validated(operation_id, &input)?;
        let config = match operation.kind() {
            OperationKind::Execution => config.serialized(),
            OperationKind::Provider => config.clone(),
        };

        let run_id = RunId::new();
        let span = obs::run_span(&run_id.0, operation_id);
        let started = Instant::now();
        obs::emit_run_started(
            &run_id.0,
            operation_id,
            config.models().len(),
            config.concurrency(),
        );

        let results = self
            .dispatch(&run_id, operation, Arc::new(input.clone()), &config, progress)
            .instrument(span.clone())
            .await;

        let run = BenchmarkRun::new(run_id, operation_id, input, config, results);
        self.persist(&run).instrument(span).await;

        obs::emit_run_finished(
            &run.id.0,
            started.elapsed().as_millis() as u64,
            run.results.len(),
            run.failure_count(),
        );
        METRICS.flush();
        Ok(run)
    }

    async fn dispatch(
        &self,
        run_id: &RunId,
        operation: Arc<dyn Operation>,
        input: Arc<Value>,
        config: &RunConfig,
        progress: ProgressSink,
    ) -> Vec<AttemptResult> {
        let sem = Arc::new(Semaphore::new(config.concurrency()));
        let delay = config.delay();
        let mut last_launch: Option<Instant> = None;
        let mut tasks = Vec::with_capacity(config.models().len());

        for model in config.models() {
            let permit = Arc::clone(&sem).acquire_owned().await.ok();

            if let Some(prev) = last_launch {
                if !delay.is_zero() {
                    tokio::time::sleep_until(prev + delay).await;
                }
            }
            last_launch = Some(Instant::now());

            let attempt = Attempt {
                run_id: run_id.0.clone(),
                model: model.clone(),
                operation: Arc::clone(&operation),
                input: Arc::clone(&input),
                collector: self.collector.clone(),
                progress: progress.clone(),
            };
            let task = tokio::spawn(
                async move {
                    let _permit = permit;
                    attempt.run().await
                }
                .in_current_span(),
            );
            tasks.push((model.id(), task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (model_id, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    // Panics are caught inside the attempt; this is a runtime
                    // cancellation or a panic in our own bookkeeping.
                    let result =
                        AttemptResult::failed(&model_id, format!("attempt task failed: {e}"), Duration::ZERO);
                    progress.emit(ProgressEvent::Error {
                        model_id: model_id.clone(),
                        duration_ms: 0,
                        error: result.error.clone().unwrap_or_default(),
                    });
                    METRICS.record_attempt(false);
                    result
                }
            };
            results.push(result);
        }
        results
    }

    async fn persist(&self, run: &BenchmarkRun) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(run).await {
                obs::emit_run_persist_error(&run.id.0, &e);
            }
        }
    }
}

/// Everything one spawned attempt owns.
struct Attempt {
    run_id: String,
    model: ModelConfig,
    operation: Arc<dyn Operation>,
    input: Arc<Value>,
    collector: MetricsCollector,
    progress: ProgressSink,
}

impl Attempt {
    async fn run(self) -> AttemptResult {
        let model_id = self.model.id();
        METRICS.inc_attempts_started();
        obs::emit_attempt_started(&self.run_id, &model_id);
        self.progress.emit(ProgressEvent::Start {
            model_id: model_id.clone(),
        });

        let operation = &self.operation;
        let input = &self.input;
        let model = &self.model;
        let measured = self
            .collector
            .measure(&model_id, model, self.progress.clone(), |sink| {
                operation.execute(input, model, sink)
            })
            .await;
        let result = measured.into_attempt_result(&model_id);

        settle(&self.run_id, &result, &self.progress);
        result
    }
}

/// Emit the terminal event and log line for a settled attempt.
pub(crate) fn settle(run_id: &str, result: &AttemptResult, progress: &ProgressSink) {
    METRICS.record_attempt(result.is_success());
    obs::emit_attempt_finished(
        run_id,
        &result.model_id,
        result.duration_ms,
        result.error.as_deref(),
    );
    let event = match &result.error {
        None => ProgressEvent::Complete {
            model_id: result.model_id.clone(),
            duration_ms: result.duration_ms,
        },
        Some(error) => ProgressEvent::Error {
            model_id: result.model_id.clone(),
            duration_ms: result.duration_ms,
            error: error.clone(),
        },
    };
    progress.emit(event);
}
