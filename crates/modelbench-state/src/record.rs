//! Benchmark run records.
//!
//! These are the persisted shapes of a benchmark: the model configurations a
//! run was asked to compare, one [`AttemptResult`] per configuration, and the
//! [`BenchmarkRun`] that groups them. A run is assembled once every attempt
//! has settled and is never mutated afterwards.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Model configuration
// ---------------------------------------------------------------------------

/// One benchmark participant: a `(provider, model, reasoning-effort)` tuple.
///
/// Renders to the stable id `provider:model[:reasoning=N]`, which is also the
/// accepted input format of [`FromStr`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelConfig {
    provider: String,
    model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<u32>,
}

impl ModelConfig {
    /// Build a model configuration. Provider and model must be non-empty and
    /// the provider must not contain `:`.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        reasoning_effort: Option<u32>,
    ) -> Result<Self, ConfigError> {
        let provider = provider.into();
        let model = model.into();
        let invalid = |reason: &str| ConfigError::InvalidModelId {
            id: format!("{provider}:{model}"),
            reason: reason.to_string(),
        };
        if provider.trim().is_empty() {
            return Err(invalid("provider must not be empty"));
        }
        if provider.contains(':') {
            return Err(invalid("provider must not contain ':'"));
        }
        if model.trim().is_empty() {
            return Err(invalid("model must not be empty"));
        }
        Ok(Self {
            provider,
            model,
            reasoning_effort,
        })
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Reasoning-effort token budget, if any.
    pub fn reasoning_effort(&self) -> Option<u32> {
        self.reasoning_effort
    }

    /// Stable identity string: `provider:model[:reasoning=N]`.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)?;
        if let Some(n) = self.reasoning_effort {
            write!(f, ":reasoning={n}")?;
        }
        Ok(())
    }
}

impl FromStr for ModelConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidModelId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let (provider, rest) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected provider:model[:reasoning=N]"))?;

        let (model, reasoning) = match rest.rsplit_once(":reasoning=") {
            Some((model, budget)) => {
                let budget: u32 = budget
                    .parse()
                    .map_err(|_| invalid("reasoning budget must be a non-negative integer"))?;
                (model, Some(budget))
            }
            None => (rest, None),
        };

        ModelConfig::new(provider, model, reasoning)
    }
}

// ---------------------------------------------------------------------------
// Run configuration
// ---------------------------------------------------------------------------

/// Which model configurations to compare and how attempts are scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    models: Vec<ModelConfig>,
    concurrency: usize,
    delay_ms: u64,
}

impl RunConfig {
    /// Validate and build a run configuration.
    ///
    /// Rejects duplicate model ids and a concurrency of zero.
    pub fn new(
        models: Vec<ModelConfig>,
        concurrency: usize,
        delay_ms: u64,
    ) -> Result<Self, ConfigError> {
        if concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        let mut seen = HashSet::new();
        for model in &models {
            let id = model.id();
            if !seen.insert(id.clone()) {
                return Err(ConfigError::DuplicateModel(id));
            }
        }
        Ok(Self {
            models,
            concurrency,
            delay_ms,
        })
    }

    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }

    /// Upper bound on simultaneously in-flight attempts.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Minimum spacing between two attempt launches.
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Copy of this configuration with concurrency pinned to 1.
    ///
    /// Used for operations that mutate the shared working tree.
    pub fn serialized(&self) -> Self {
        Self {
            models: self.models.clone(),
            concurrency: 1,
            delay_ms: self.delay_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt results
// ---------------------------------------------------------------------------

/// Token accounting reported by a provider at the end of a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Outcome of one attempt: one operation executed under one model configuration.
///
/// Exactly one of `output` / `error` is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptResult {
    /// Id of the [`ModelConfig`] this attempt ran under.
    pub model_id: String,

    /// Operation-specific payload (None on failure).
    pub output: Option<serde_json::Value>,

    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,

    /// Failure message (None on success).
    pub error: Option<String>,

    /// When the attempt settled.
    pub timestamp: DateTime<Utc>,

    pub token_usage: Option<TokenUsage>,

    /// Byte length of the serialized output.
    pub response_size_bytes: Option<u64>,

    pub bytes_per_second: Option<f64>,

    /// Completion tokens per second (requires usage data).
    pub tokens_per_second: Option<f64>,

    /// Milliseconds from attempt start to the first non-empty output increment.
    pub time_to_first_unit_ms: Option<u64>,

    /// Point cost estimate in USD.
    pub cost_estimate: Option<f64>,

    /// Isolation record for execution-kind attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionAttempt>,
}

impl AttemptResult {
    /// A settled, successful attempt with no metrics attached yet.
    pub fn succeeded(model_id: impl Into<String>, output: serde_json::Value, duration: Duration) -> Self {
        Self::settled(model_id.into(), Some(output), None, duration)
    }

    /// A settled, failed attempt.
    pub fn failed(model_id: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self::settled(model_id.into(), None, Some(error.into()), duration)
    }

    fn settled(
        model_id: String,
        output: Option<serde_json::Value>,
        error: Option<String>,
        duration: Duration,
    ) -> Self {
        Self {
            model_id,
            output,
            duration_ms: duration.as_millis() as u64,
            error,
            timestamp: Utc::now(),
            token_usage: None,
            response_size_bytes: None,
            bytes_per_second: None,
            tokens_per_second: None,
            time_to_first_unit_ms: None,
            cost_estimate: None,
            execution: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ---------------------------------------------------------------------------
// Execution-kind records
// ---------------------------------------------------------------------------

/// Repository state observed at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoState {
    /// HEAD revision (full SHA).
    pub revision: String,
    /// Checked-out branch name.
    pub branch: String,
    pub has_uncommitted_changes: bool,
}

/// Result of trying to observe the repository.
///
/// Capture failures are recorded as `Unavailable` rather than being read as
/// "clean": a missing snapshot means "unknown".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotCapture {
    Captured(RepoState),
    Unavailable { reason: String },
}

impl SnapshotCapture {
    pub fn state(&self) -> Option<&RepoState> {
        match self {
            SnapshotCapture::Captured(state) => Some(state),
            SnapshotCapture::Unavailable { .. } => None,
        }
    }

    pub fn revision(&self) -> Option<&str> {
        self.state().map(|s| s.revision.as_str())
    }
}

/// Repository observations taken before and after one isolated attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationSnapshot {
    pub before: SnapshotCapture,
    pub after: SnapshotCapture,
}

/// Outcome of one verification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub command: String,
    pub passed: bool,
    /// Process exit code; None when the command could not run or was killed.
    pub exit_code: Option<i32>,
    /// Combined stdout/stderr.
    pub output: String,
    /// Spawn or timeout failure.
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// A commit created by the engine on behalf of an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// One pass through the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerAttempt {
    /// 1-based retry counter.
    pub attempt_number: u32,
    /// Model configuration actually used for this pass.
    pub model_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub verification: Vec<VerificationResult>,
    pub duration_ms: u64,
}

/// Isolation and verification record for an execution-kind attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionAttempt {
    /// Number of retry-loop passes consumed.
    pub attempt_number: u32,
    pub success: bool,
    pub branch_name: String,
    /// Model configuration used on the final pass.
    pub model_id: String,
    /// Verification outcomes of the final pass.
    pub verification: Vec<VerificationResult>,
    /// Present if pending changes were auto-committed.
    pub commit: Option<CommitInfo>,
    /// Whether the isolation branch gained commits; None if unknown.
    pub has_new_commits: Option<bool>,
    pub snapshot: IsolationSnapshot,
    pub attempts: Vec<InnerAttempt>,
    pub branch_kept: bool,
    /// Branch deletion failure, if any.
    pub cleanup_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Benchmark runs
// ---------------------------------------------------------------------------

/// Unique identifier for a benchmark run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    /// First 8 characters, for branch names and log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// SHA-256 hex digest of the canonical JSON encoding of an input payload.
pub fn input_digest(input: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(input).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// A completed benchmark: one operation compared across model configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub id: RunId,
    pub timestamp: DateTime<Utc>,
    /// Operation id or command label.
    pub operation: String,
    /// Input payload as given to the operation.
    pub input: serde_json::Value,
    /// See [`input_digest`].
    pub input_digest: String,
    pub config: RunConfig,
    /// One result per requested model, in request order.
    pub results: Vec<AttemptResult>,
}

impl BenchmarkRun {
    /// Assemble a run under a pre-generated id.
    pub fn new(
        id: RunId,
        operation: impl Into<String>,
        input: serde_json::Value,
        config: RunConfig,
        results: Vec<AttemptResult>,
    ) -> Self {
        let input_digest = input_digest(&input);
        Self {
            id,
            timestamp: Utc::now(),
            operation: operation.into(),
            input,
            input_digest,
            config,
            results,
        }
    }

    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_success()).count()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            timestamp: self.timestamp,
            operation: self.operation.clone(),
            model_count: self.results.len(),
            failures: self.failure_count(),
        }
    }
}

/// Listing entry for a stored run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub model_count: usize,
    pub failures: usize,
}
