//! Streaming performance metrics for a single attempt.
//!
//! [`MetricsCollector::measure`] wraps an operation call. The operation gets a
//! [`StreamSink`] to push text increments into; when it returns, the collector
//! derives duration, time-to-first-unit, throughput and a cost estimate.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::domain::{AttemptResult, ModelConfig, ProgressEvent, ProgressSink, TokenUsage};

/// Value returned by an operation: its payload plus optional usage accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutput {
    pub value: serde_json::Value,
    pub usage: Option<TokenUsage>,
}

impl OperationOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value, usage: None }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}

impl From<serde_json::Value> for OperationOutput {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

struct StreamState {
    started: Instant,
    first_unit: OnceLock<Duration>,
    text: Mutex<String>,
}

/// Handle an operation pushes streamed text increments into.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct StreamSink {
    state: Arc<StreamState>,
    model_id: String,
    progress: ProgressSink,
}

impl StreamSink {
    fn start(model_id: &str, progress: ProgressSink) -> Self {
        Self {
            state: Arc::new(StreamState {
                started: Instant::now(),
                first_unit: OnceLock::new(),
                text: Mutex::new(String::new()),
            }),
            model_id: model_id.to_string(),
            progress,
        }
    }

    /// A sink not attached to any collector. Increments are buffered but no
    /// events are emitted.
    pub fn detached() -> Self {
        Self::start("", ProgressSink::none())
    }

    /// Append one increment. Empty increments are ignored.
    ///
    /// The first non-empty increment latches time-to-first-unit.
    pub fn push(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        let elapsed = self.state.started.elapsed();
        let _ = self.state.first_unit.set(elapsed);

        let size = {
            let mut text = self.state.text.lock().unwrap_or_else(|e| e.into_inner());
            text.push_str(chunk);
            text.len() as u64
        };

        let secs = elapsed.as_secs_f64();
        self.progress.emit(ProgressEvent::Progress {
            model_id: self.model_id.clone(),
            current_size_bytes: size,
            current_bytes_per_second: if secs > 0.0 { size as f64 / secs } else { 0.0 },
        });
    }

    /// Everything pushed so far.
    pub fn text(&self) -> String {
        self.state
            .text
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn time_to_first_unit(&self) -> Option<Duration> {
        self.state.first_unit.get().copied()
    }
}

// ---------------------------------------------------------------------------
// Cost estimation
// ---------------------------------------------------------------------------

/// Pluggable point cost estimate for one attempt's token usage.
pub trait CostEstimator: Send + Sync {
    /// USD estimate, or None when the model is not priced.
    fn estimate(&self, model: &ModelConfig, usage: &TokenUsage) -> Option<f64>;
}

/// USD price per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrice {
    pub prompt_per_million: f64,
    pub completion_per_million: f64,
}

/// Static pricing table keyed by `(provider, model)`.
///
/// A model of `"*"` prices every model of that provider. Unpriced models
/// yield no estimate.
#[derive(Debug, Clone, Default)]
pub struct PricingTable {
    prices: HashMap<(String, String), ModelPrice>,
}

impl PricingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(
        mut self,
        provider: impl Into<String>,
        model: impl Into<String>,
        price: ModelPrice,
    ) -> Self {
        self.prices.insert((provider.into(), model.into()), price);
        self
    }

    fn lookup(&self, model: &ModelConfig) -> Option<&ModelPrice> {
        let provider = model.provider().to_string();
        self.prices
            .get(&(provider.clone(), model.model().to_string()))
            .or_else(|| self.prices.get(&(provider, "*".to_string())))
    }
}

impl CostEstimator for PricingTable {
    fn estimate(&self, model: &ModelConfig, usage: &TokenUsage) -> Option<f64> {
        let price = self.lookup(model)?;
        Some(
            usage.prompt_tokens as f64 / 1_000_000.0 * price.prompt_per_million
                + usage.completion_tokens as f64 / 1_000_000.0 * price.completion_per_million,
        )
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Metrics derived for a completed attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptMetrics {
    pub duration: Duration,
    pub time_to_first_unit: Option<Duration>,
    pub response_size_bytes: u64,
    pub bytes_per_second: Option<f64>,
    pub tokens_per_second: Option<f64>,
    pub cost_estimate: Option<f64>,
    pub token_usage: Option<TokenUsage>,
}

impl AttemptMetrics {
    /// Derive throughput figures from raw observations.
    ///
    /// Rates are None for a zero duration; tokens/second is None without usage.
    pub fn derive(
        duration: Duration,
        time_to_first_unit: Option<Duration>,
        output: &serde_json::Value,
        usage: Option<TokenUsage>,
        cost_estimate: Option<f64>,
    ) -> Self {
        let response_size_bytes = serde_json::to_string(output)
            .map(|s| s.len() as u64)
            .unwrap_or(0);
        let secs = duration.as_secs_f64();
        let per_second = |amount: u64| (secs > 0.0).then(|| amount as f64 / secs);

        Self {
            duration,
            time_to_first_unit,
            response_size_bytes,
            bytes_per_second: per_second(response_size_bytes),
            tokens_per_second: usage.and_then(|u| per_second(u.completion_tokens)),
            cost_estimate,
            token_usage: usage,
        }
    }

    /// Copy the metric fields onto an attempt result.
    pub fn apply(&self, result: &mut AttemptResult) {
        result.duration_ms = self.duration.as_millis() as u64;
        result.time_to_first_unit_ms = self.time_to_first_unit.map(|d| d.as_millis() as u64);
        result.response_size_bytes = Some(self.response_size_bytes);
        result.bytes_per_second = self.bytes_per_second;
        result.tokens_per_second = self.tokens_per_second;
        result.cost_estimate = self.cost_estimate;
        result.token_usage = self.token_usage;
    }
}

/// Outcome of one measured call.
#[derive(Debug)]
pub enum Measured {
    Completed {
        output: serde_json::Value,
        /// Concatenation of every streamed increment.
        full_output: String,
        metrics: AttemptMetrics,
    },
    Failed {
        error: anyhow::Error,
        duration: Duration,
    },
}

impl Measured {
    pub fn duration(&self) -> Duration {
        match self {
            Measured::Completed { metrics, .. } => metrics.duration,
            Measured::Failed { duration, .. } => *duration,
        }
    }

    /// Convert into the persisted attempt record.
    pub fn into_attempt_result(self, model_id: &str) -> AttemptResult {
        match self {
            Measured::Completed {
                output, metrics, ..
            } => {
                let mut result = AttemptResult::succeeded(model_id, output, metrics.duration);
                metrics.apply(&mut result);
                result
            }
            Measured::Failed { error, duration } => {
                AttemptResult::failed(model_id, format!("{error:#}"), duration)
            }
        }
    }
}

/// Wraps operation calls and derives [`AttemptMetrics`].
#[derive(Clone)]
pub struct MetricsCollector {
    cost: Arc<dyn CostEstimator>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Arc::new(PricingTable::default()))
    }
}

impl MetricsCollector {
    pub fn new(cost: Arc<dyn CostEstimator>) -> Self {
        Self { cost }
    }

    /// Run `call` and measure it.
    ///
    /// `row_id` labels the progress events; `model` is the configuration the
    /// call actually runs under and is what gets priced. A panic inside
    /// `call` is caught and reported as a failure.
    ///
    /// If the operation returns `null` after streaming text, the streamed
    /// text becomes the output.
    pub async fn measure<F, Fut>(
        &self,
        row_id: &str,
        model: &ModelConfig,
        progress: ProgressSink,
        call: F,
    ) -> Measured
    where
        F: FnOnce(StreamSink) -> Fut,
        Fut: Future<Output = anyhow::Result<OperationOutput>>,
    {
        let sink = StreamSink::start(row_id, progress);
        let started = sink.state.started;

        let outcome = AssertUnwindSafe(call(sink.clone())).catch_unwind().await;
        let duration = started.elapsed();

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => return Measured::Failed { error, duration },
            Err(panic) => {
                return Measured::Failed {
                    error: anyhow::anyhow!("operation panicked: {}", panic_message(&*panic)),
                    duration,
                }
            }
        };

        let full_output = sink.text();
        let value = match output.value {
            serde_json::Value::Null if !full_output.is_empty() => {
                serde_json::Value::String(full_output.clone())
            }
            value => value,
        };
        let cost = output
            .usage
            .as_ref()
            .and_then(|usage| self.cost.estimate(model, usage));
        let metrics = AttemptMetrics::derive(
            duration,
            sink.time_to_first_unit(),
            &value,
            output.usage,
            cost,
        );

        Measured::Completed {
            output: value,
            full_output,
            metrics,
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
