//! Benchmark dispatcher behaviour: ordering, fault isolation, scheduling
//! bounds, validation and persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use modelbench_core::{
    BenchError, BenchmarkDispatcher, FnOperation, ModelConfig, OperationKind, OperationOutput,
    OperationRegistry, ProgressEvent, ProgressSink, RunConfig, RunStore, TokenUsage,
};
use modelbench_state::fakes::MemoryRunStore;
use serde_json::{json, Value};
use tokio::time::Instant;

fn model(id: &str) -> ModelConfig {
    id.parse().unwrap()
}

fn config(ids: &[&str], concurrency: usize, delay_ms: u64) -> RunConfig {
    RunConfig::new(ids.iter().map(|id| model(id)).collect(), concurrency, delay_ms).unwrap()
}

/// Scripted behaviour per model id: sleep for `ms`, then succeed or fail.
#[derive(Clone, Copy)]
enum Script {
    Ok(u64),
    Fail(u64),
    Panic,
}

/// Operation that follows a per-model script and tracks in-flight attempts.
struct Scripted {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    launches: Arc<Mutex<Vec<(String, Instant)>>>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new() -> Self {
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
            launches: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn operation(&self, id: &str, script: HashMap<String, Script>) -> FnOperation {
        let in_flight = Arc::clone(&self.in_flight);
        let max_in_flight = Arc::clone(&self.max_in_flight);
        let launches = Arc::clone(&self.launches);
        let calls = Arc::clone(&self.calls);
        let script = Arc::new(script);

        FnOperation::new(
            id,
            |input: &Value| input.get("prompt").is_some(),
            move |_input, model, stream| {
                let in_flight = Arc::clone(&in_flight);
                let max_in_flight = Arc::clone(&max_in_flight);
                let launches = Arc::clone(&launches);
                let calls = Arc::clone(&calls);
                let step = script.get(&model.id()).copied().unwrap_or(Script::Ok(10));
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    launches.lock().unwrap().push((model.id(), Instant::now()));
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_flight.fetch_max(now, Ordering::SeqCst);

                    let outcome = match step {
                        Script::Ok(ms) => {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            stream.push("answer");
                            Ok(OperationOutput::new(json!({"model": model.id()}))
                                .with_usage(TokenUsage::new(5, 10)))
                        }
                        Script::Fail(ms) => {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            Err(anyhow::anyhow!("provider outage for {}", model.provider()))
                        }
                        Script::Panic => {
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            panic!("adapter bug");
                        }
                    };
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    outcome
                }
                .boxed()
            },
        )
    }
}

fn script(entries: &[(&str, Script)]) -> HashMap<String, Script> {
    entries
        .iter()
        .map(|(id, s)| (id.to_string(), *s))
        .collect()
}

fn dispatcher(op: FnOperation) -> BenchmarkDispatcher {
    let mut registry = OperationRegistry::new();
    registry.register(op);
    BenchmarkDispatcher::new(Arc::new(registry))
}

#[tokio::test(start_paused = true)]
async fn one_failure_does_not_affect_the_other_model() {
    let scripted = Scripted::new();
    let op = scripted.operation(
        "chat",
        script(&[("a:x", Script::Ok(100)), ("b:y", Script::Fail(50))]),
    );
    let run = dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&["a:x", "b:y"], 2, 0), ProgressSink::none())
        .await
        .unwrap();

    assert_eq!(run.results.len(), 2);
    let a = &run.results[0];
    let b = &run.results[1];
    assert_eq!(a.model_id, "a:x");
    assert!(a.error.is_none());
    assert_eq!(a.output, Some(json!({"model": "a:x"})));
    assert_eq!(a.duration_ms, 100);
    assert_eq!(b.model_id, "b:y");
    assert_eq!(b.error.as_deref(), Some("provider outage for b"));
    assert!(b.output.is_none());
    assert_eq!(b.duration_ms, 50);
    assert_eq!(run.failure_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn results_follow_request_order_not_completion_order() {
    let scripted = Scripted::new();
    let ids = ["a:slow", "b:mid", "c:fast", "d:fastest"];
    let op = scripted.operation(
        "chat",
        script(&[
            ("a:slow", Script::Ok(400)),
            ("b:mid", Script::Ok(300)),
            ("c:fast", Script::Ok(200)),
            ("d:fastest", Script::Ok(100)),
        ]),
    );
    let (progress, mut rx) = ProgressSink::channel();
    let run = dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&ids, 4, 0), progress)
        .await
        .unwrap();

    let got: Vec<_> = run.results.iter().map(|r| r.model_id.as_str()).collect();
    assert_eq!(got, ids);

    let mut completion_order = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ProgressEvent::Complete { model_id, .. } = event {
            completion_order.push(model_id);
        }
    }
    assert_eq!(completion_order, vec!["d:fastest", "c:fast", "b:mid", "a:slow"]);
}

#[tokio::test(start_paused = true)]
async fn in_flight_attempts_never_exceed_concurrency() {
    let scripted = Scripted::new();
    let ids = ["p:1", "p:2", "p:3", "p:4", "p:5", "p:6", "p:7"];
    let entries: Vec<_> = ids.iter().map(|id| (*id, Script::Ok(100))).collect();
    let op = scripted.operation("chat", script(&entries));

    let started = Instant::now();
    let run = dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&ids, 3, 0), ProgressSink::none())
        .await
        .unwrap();

    assert_eq!(run.results.len(), 7);
    assert_eq!(scripted.max_in_flight.load(Ordering::SeqCst), 3);
    // ceil(7 / 3) waves of 100ms.
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn launches_are_spaced_by_delay() {
    let scripted = Scripted::new();
    let ids = ["p:1", "p:2", "p:3"];
    let entries: Vec<_> = ids.iter().map(|id| (*id, Script::Ok(1_000))).collect();
    let op = scripted.operation("chat", script(&entries));

    let started = Instant::now();
    dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&ids, 3, 250), ProgressSink::none())
        .await
        .unwrap();

    let launches = scripted.launches.lock().unwrap().clone();
    let offsets: Vec<_> = launches
        .iter()
        .map(|(_, at)| at.duration_since(started).as_millis())
        .collect();
    assert_eq!(offsets, vec![0, 250, 500]);
    // The throttle spaces launches but does not serialize execution.
    assert_eq!(scripted.max_in_flight.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unknown_operation_fails_fast() {
    let scripted = Scripted::new();
    let (progress, mut rx) = ProgressSink::channel();
    let err = dispatcher(scripted.operation("chat", HashMap::new()))
        .run("summarize", json!({"prompt": "hi"}), &config(&["a:x"], 1, 0), progress)
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::UnknownOperation(ref id) if id == "summarize"));
    assert!(err.is_validation());
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn invalid_input_fails_fast_without_attempts() {
    let scripted = Scripted::new();
    let store = Arc::new(MemoryRunStore::new());
    let (progress, mut rx) = ProgressSink::channel();
    let err = dispatcher(scripted.operation("chat", HashMap::new()))
        .with_store(store.clone())
        .run("chat", json!({"no_prompt": true}), &config(&["a:x", "b:y"], 2, 0), progress)
        .await
        .unwrap_err();

    assert!(matches!(err, BenchError::InvalidInput { ref operation } if operation == "chat"));
    assert_eq!(scripted.calls.load(Ordering::SeqCst), 0);
    assert!(rx.try_recv().is_err());
    assert!(store.is_empty());
}

#[tokio::test]
async fn panicking_operation_is_recorded_as_failure() {
    let scripted = Scripted::new();
    let op = scripted.operation(
        "chat",
        script(&[("a:x", Script::Panic), ("b:y", Script::Ok(5))]),
    );
    let run = dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&["a:x", "b:y"], 2, 0), ProgressSink::none())
        .await
        .unwrap();

    assert!(run.results[0].error.as_ref().unwrap().contains("adapter bug"));
    assert!(run.results[1].is_success());
}

#[tokio::test]
async fn panicking_progress_callback_does_not_abort_run() {
    let scripted = Scripted::new();
    let op = scripted.operation("chat", HashMap::new());
    let progress = ProgressSink::new(|event| {
        if event.is_terminal() {
            panic!("observer bug");
        }
    });
    let run = dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&["a:x", "b:y"], 2, 0), progress)
        .await
        .unwrap();

    assert_eq!(run.results.len(), 2);
    assert!(run.results.iter().all(|r| r.is_success()));
}

#[tokio::test]
async fn every_attempt_gets_start_and_one_terminal_event() {
    let scripted = Scripted::new();
    let op = scripted.operation(
        "chat",
        script(&[("a:x", Script::Ok(5)), ("b:y", Script::Fail(5))]),
    );
    let (progress, mut rx) = ProgressSink::channel();
    dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&["a:x", "b:y"], 2, 0), progress)
        .await
        .unwrap();

    let mut events: HashMap<String, Vec<ProgressEvent>> = HashMap::new();
    while let Ok(event) = rx.try_recv() {
        events.entry(event.model_id().to_string()).or_default().push(event);
    }
    for id in ["a:x", "b:y"] {
        let seen = &events[id];
        assert!(matches!(seen.first(), Some(ProgressEvent::Start { .. })));
        assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(seen.last().unwrap().is_terminal());
    }
    assert!(events["a:x"]
        .iter()
        .any(|e| matches!(e, ProgressEvent::Progress { current_size_bytes: 6, .. })));
    assert!(matches!(
        events["b:y"].last(),
        Some(ProgressEvent::Error { error, .. }) if error.contains("outage")
    ));
}

#[tokio::test(start_paused = true)]
async fn execution_kind_runs_one_at_a_time() {
    let scripted = Scripted::new();
    let ids = ["a:x", "b:y", "c:z"];
    let entries: Vec<_> = ids.iter().map(|id| (*id, Script::Ok(50))).collect();
    let op = scripted
        .operation("apply-patch", script(&entries))
        .with_kind(OperationKind::Execution);

    let run = dispatcher(op)
        .run("apply-patch", json!({"prompt": "hi"}), &config(&ids, 4, 0), ProgressSink::none())
        .await
        .unwrap();

    assert_eq!(run.config.concurrency(), 1);
    assert_eq!(scripted.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn finished_run_is_persisted_and_round_trips() {
    let scripted = Scripted::new();
    let op = scripted.operation(
        "chat",
        script(&[("a:x", Script::Ok(5)), ("b:y", Script::Fail(5))]),
    );
    let store = Arc::new(MemoryRunStore::new());
    let run = dispatcher(op)
        .with_store(store.clone())
        .run("chat", json!({"prompt": "hi"}), &config(&["a:x", "b:y"], 2, 0), ProgressSink::none())
        .await
        .unwrap();

    let stored = store.get(&run.id).await.unwrap();
    assert_eq!(stored, run);
    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].operation, "chat");
    assert_eq!(listed[0].failures, 1);
}

#[tokio::test(start_paused = true)]
async fn throughput_metrics_are_attached() {
    let scripted = Scripted::new();
    let op = scripted.operation("chat", script(&[("a:x", Script::Ok(500))]));
    let run = dispatcher(op)
        .run("chat", json!({"prompt": "hi"}), &config(&["a:x"], 1, 0), ProgressSink::none())
        .await
        .unwrap();

    let r = &run.results[0];
    assert_eq!(r.time_to_first_unit_ms, Some(500));
    assert_eq!(r.token_usage, Some(TokenUsage::new(5, 10)));
    assert_eq!(r.tokens_per_second, Some(20.0));
    assert!(r.response_size_bytes.unwrap() > 0);
    assert!(r.cost_estimate.is_none());
}
