//! Cross-crate integration and E2E tests
//!
//! These run the tracer against a local mock collector over real HTTP and
//! check what arrives on the wire.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agenta_tracing::{
    Attributes, ContextState, ExecutionContext, FileSink, Tracer, TracingConfig, with_context,
    with_current,
};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::sync::oneshot;

#[derive(Clone, Default)]
struct Received {
    bodies: Arc<Mutex<Vec<Value>>>,
    auth: Arc<Mutex<Vec<String>>>,
}

struct MockCollector {
    addr: SocketAddr,
    received: Received,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockCollector {
    async fn start(status: StatusCode) -> Self {
        let received = Received::default();
        let state = (received.clone(), status);

        let app = Router::new()
            .route("/api/observability/traces/", post(handle_traces))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            received,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn bodies(&self) -> Vec<Value> {
        self.received.bodies.lock().unwrap().clone()
    }

    fn auth_headers(&self) -> Vec<String> {
        self.received.auth.lock().unwrap().clone()
    }

    fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle_traces(
    State((received, status)): State<(Received, StatusCode)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        received.auth.lock().unwrap().push(auth.to_string());
    }
    received.bodies.lock().unwrap().push(body);
    (status, Json(json!({"status": "ok"})))
}

fn attrs(value: Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

fn config(host: String, api_key: Option<&str>) -> TracingConfig {
    let mut config = TracingConfig::new(host, "app-e2e").with_timeout(Duration::from_secs(5));
    config.api_key = api_key.map(str::to_string);
    config
}

fn record_two_span_trace(tracer: &Tracer, ctx: &mut ExecutionContext) {
    tracer.open_span(ctx, "root", "CHAIN", Attributes::new(), None);
    tracer.open_span(ctx, "child", "LLM", attrs(json!({"prompt": "hi"})), None);
    tracer.close_span(
        ctx,
        attrs(json!({
            "cost": 1.0,
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })),
    );
    tracer.close_span(ctx, Attributes::new());
}

/// E2E Test: a finished trace is posted to the collector with its spans
#[tokio::test]
async fn test_trace_is_posted_to_collector() {
    let collector = MockCollector::start(StatusCode::OK).await;
    let tracer = Tracer::new(config(collector.url(), Some("secret-key"))).unwrap();

    let mut ctx = ExecutionContext::new();
    record_two_span_trace(&tracer, &mut ctx);
    let trace = tracer.close_trace(&mut ctx).unwrap();
    assert_eq!(ctx.state(), ContextState::Idle);

    assert!(tracer.flush_and_wait(Duration::from_secs(10)).await);
    let queue = tracer.queue().unwrap();
    assert_eq!(queue.completed(), 1);

    let bodies = collector.bodies();
    assert_eq!(bodies.len(), 1);
    let body = &bodies[0];
    assert_eq!(body["trace"], json!(trace.trace_id));

    let spans = body["spans"].as_array().unwrap();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0]["name"], "root");
    assert!(spans[0]["parent_span_id"].is_null());
    assert_eq!(spans[0]["cost"], 1.0);
    assert_eq!(spans[0]["tokens"]["total_tokens"], 15);
    assert_eq!(spans[1]["spankind"], "LLM");
    assert_eq!(spans[1]["parent_span_id"], spans[0]["id"]);
    assert_eq!(spans[1]["app_id"], "app-e2e");

    assert_eq!(collector.auth_headers(), vec!["secret-key".to_string()]);
    collector.shutdown();
}

/// E2E Test: collector errors are swallowed by the dispatch queue
#[tokio::test]
async fn test_collector_failure_does_not_reach_caller() {
    let collector = MockCollector::start(StatusCode::INTERNAL_SERVER_ERROR).await;
    let tracer = Tracer::new(config(collector.url(), Some("k"))).unwrap();

    let mut ctx = ExecutionContext::new();
    record_two_span_trace(&tracer, &mut ctx);
    assert!(tracer.close_trace(&mut ctx).is_some());

    assert!(tracer.flush_and_wait(Duration::from_secs(10)).await);
    let queue = tracer.queue().unwrap();
    assert_eq!(queue.failed(), 1);
    assert_eq!(queue.completed(), 0);
    assert_eq!(collector.bodies().len(), 1);
    collector.shutdown();
}

/// E2E Test: without an API key nothing is sent
#[tokio::test]
async fn test_no_api_key_keeps_trace_local() {
    let collector = MockCollector::start(StatusCode::OK).await;
    let tracer = Tracer::new(config(collector.url(), None)).unwrap();

    let mut ctx = ExecutionContext::new();
    record_two_span_trace(&tracer, &mut ctx);
    let trace = tracer.close_trace(&mut ctx).unwrap();
    assert_eq!(trace.spans().len(), 2);

    assert!(tracer.flush_and_wait(Duration::from_secs(1)).await);
    assert_eq!(tracer.queue().unwrap().submitted(), 0);
    assert!(collector.bodies().is_empty());
    collector.shutdown();
}

/// E2E Test: an unreachable collector is logged and dropped
#[tokio::test]
async fn test_unreachable_collector() {
    let tracer = Tracer::new(config("http://127.0.0.1:1".to_string(), Some("k"))).unwrap();

    let mut ctx = ExecutionContext::new();
    record_two_span_trace(&tracer, &mut ctx);
    tracer.close_trace(&mut ctx);

    assert!(tracer.flush_and_wait(Duration::from_secs(10)).await);
    assert_eq!(tracer.queue().unwrap().failed(), 1);
}

/// Concurrent requests sharing one tracer record separate traces
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_isolated() {
    let collector = MockCollector::start(StatusCode::OK).await;
    let tracer = Arc::new(Tracer::new(config(collector.url(), Some("k")).with_max_workers(2)).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let tracer = Arc::clone(&tracer);
            tokio::spawn(async move {
                let (_, mut ctx) = with_context(async {
                    with_current(|ctx| {
                        tracer.open_span(ctx, format!("request-{i}"), "chain", Attributes::new(), None)
                    });
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    with_current(|ctx| {
                        tracer.open_span(ctx, "llm", "llm", Attributes::new(), None);
                        tracer.close_span(ctx, attrs(json!({"cost": 0.5})));
                        tracer.close_span(ctx, Attributes::new());
                    });
                })
                .await;
                tracer.close_trace(&mut ctx).unwrap()
            })
        })
        .collect();

    let mut trace_ids = Vec::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let trace = handle.await.unwrap();
        let root = trace.root().unwrap();
        assert_eq!(root.name, format!("request-{i}"));
        assert_eq!(root.cost, Some(0.5));
        assert_eq!(trace.spans().len(), 2);
        trace_ids.push(trace.trace_id);
    }
    trace_ids.sort();
    trace_ids.dedup();
    assert_eq!(trace_ids.len(), 8);

    assert!(tracer.flush_and_wait(Duration::from_secs(10)).await);
    assert_eq!(collector.bodies().len(), 8);
    collector.shutdown();
}

/// A file sink can stand in for the collector
#[tokio::test]
async fn test_file_sink_receives_dispatched_traces() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.jsonl");
    let sink = Arc::new(FileSink::session(&path).unwrap());

    let tracer = Tracer::builder(config("http://unused".to_string(), Some("k")))
        .sink(sink)
        .build()
        .unwrap();

    let mut ctx = ExecutionContext::new();
    record_two_span_trace(&tracer, &mut ctx);
    let trace = tracer.close_trace(&mut ctx).unwrap();
    assert!(tracer.flush_and_wait(Duration::from_secs(5)).await);

    let records = FileSink::read_records(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].trace, trace.trace_id);
    assert_eq!(records[0].spans.len(), 2);
}
