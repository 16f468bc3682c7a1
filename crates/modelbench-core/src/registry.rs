//! Operation registry.
//!
//! Maps an operation id to an adapter: an input validator plus an async
//! callable supplied by the business-logic layer. The core never inspects the
//! input payload beyond passing it through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collector::{OperationOutput, StreamSink};
use crate::domain::{BenchError, ModelConfig, Result};

/// Scheduling regime an operation needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Pure provider call; attempts may run in parallel.
    #[default]
    Provider,
    /// Mutates the shared working tree; attempts run one at a time.
    Execution,
}

/// Adapter contract for a benchmarkable operation.
#[async_trait]
pub trait Operation: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn name(&self) -> &str {
        self.id()
    }

    fn description(&self) -> &str {
        ""
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Provider
    }

    /// Pure, side-effect-free input check.
    fn validate_input(&self, input: &Value) -> bool;

    /// Run the operation under one model configuration, pushing streamed text
    /// into `stream` as it arrives.
    async fn execute(
        &self,
        input: &Value,
        model: &ModelConfig,
        stream: StreamSink,
    ) -> anyhow::Result<OperationOutput>;
}

type Validator = dyn Fn(&Value) -> bool + Send + Sync;
type Executor =
    dyn Fn(Value, ModelConfig, StreamSink) -> BoxFuture<'static, anyhow::Result<OperationOutput>>
        + Send
        + Sync;

/// An [`Operation`] assembled from a validator closure and an executor closure.
pub struct FnOperation {
    id: String,
    name: String,
    description: String,
    kind: OperationKind,
    validator: Box<Validator>,
    executor: Box<Executor>,
}

impl FnOperation {
    pub fn new<V, E>(id: impl Into<String>, validator: V, executor: E) -> Self
    where
        V: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(Value, ModelConfig, StreamSink) -> BoxFuture<'static, anyhow::Result<OperationOutput>>
            + Send
            + Sync
            + 'static,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            kind: OperationKind::Provider,
            validator: Box::new(validator),
            executor: Box::new(executor),
        }
    }

    pub fn named(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = name.into();
        self.description = description.into();
        self
    }

    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.kind = kind;
        self
    }
}

#[async_trait]
impl Operation for FnOperation {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn validate_input(&self, input: &Value) -> bool {
        (self.validator)(input)
    }

    async fn execute(
        &self,
        input: &Value,
        model: &ModelConfig,
        stream: StreamSink,
    ) -> anyhow::Result<OperationOutput> {
        (self.executor)(input.clone(), model.clone(), stream).await
    }
}

/// Human-readable listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub kind: OperationKind,
}

/// Lookup table of registered operations.
///
/// Registration is a startup step: registering an id twice replaces the
/// earlier adapter.
#[derive(Default, Clone)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: impl Operation) {
        let id = operation.id().to_string();
        if self.operations.insert(id.clone(), Arc::new(operation)).is_some() {
            tracing::debug!(operation = %id, "operation re-registered; previous adapter replaced");
        }
    }

    /// Register an operation from a validator and an executor closure.
    pub fn register_fn<V, E>(&mut self, id: impl Into<String>, validator: V, executor: E)
    where
        V: Fn(&Value) -> bool + Send + Sync + 'static,
        E: Fn(Value, ModelConfig, StreamSink) -> BoxFuture<'static, anyhow::Result<OperationOutput>>
            + Send
            + Sync
            + 'static,
    {
        self.register(FnOperation::new(id, validator, executor));
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(id).cloned()
    }

    /// Resolve `id` and check `input` against its validator.
    pub fn resolve_validated(&self, id: &str, input: &Value) -> Result<Arc<dyn Operation>> {
        let operation = self
            .resolve(id)
            .ok_or_else(|| BenchError::UnknownOperation(id.to_string()))?;
        if !operation.validate_input(input) {
            return Err(BenchError::InvalidInput {
                operation: id.to_string(),
            });
        }
        Ok(operation)
    }

    /// All registered operations, sorted by id.
    pub fn list(&self) -> Vec<OperationDescriptor> {
        let mut out: Vec<_> = self
            .operations
            .values()
            .map(|op| OperationDescriptor {
                id: op.id().to_string(),
                name: op.name().to_string(),
                description: op.description().to_string(),
                kind: op.kind(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.operations.keys().collect();
        ids.sort();
        f.debug_struct("OperationRegistry")
            .field("operations", &ids)
            .finish()
    }
}
