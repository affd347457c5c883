// tests/api_http.rs
//
// HTTP-level tests for the trigger Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /crawl/{selector} (known, unknown, no-op and unregistered selectors)
// - completion payload handed to the notifier

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tokio::sync::oneshot;
use tower::ServiceExt as _; // for `oneshot`

use devport_ingest::api::{create_router, AppState};
use devport_ingest::ingest::providers::{DevtoProvider, SourceRegistry};
use devport_ingest::notify::{CompletionPayload, RunNotifier};
use devport_ingest::store::{MemoryStore, PersistedRecord};
use devport_ingest::summarize::providers::MockTransport;

const BODY_LIMIT: usize = 1024 * 1024;
const DEVTO: &str = include_str!("fixtures/devto_articles.json");

/// Hands the first payload it sees to the test.
struct CapturingNotifier {
    tx: Mutex<Option<oneshot::Sender<CompletionPayload>>>,
}

#[async_trait]
impl RunNotifier for CapturingNotifier {
    async fn notify(&self, payload: &CompletionPayload) -> anyhow::Result<()> {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(payload.clone());
        }
        Ok(())
    }
}

fn test_router(notifier: Option<Arc<dyn RunNotifier>>) -> (Router, Arc<MemoryStore>) {
    let h = harness(MockTransport::valid(), MemoryStore::new());
    let registry = SourceRegistry::new().with(Arc::new(DevtoProvider::from_fixture(DEVTO)));
    let router = create_router(AppState {
        pipeline: Arc::new(h.pipeline),
        registry: Arc::new(registry),
        notifier,
    });
    (router, h.store)
}

async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _) = test_router(None);
    let (status, body) = call(app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(body).unwrap(), "ok");
}

#[tokio::test]
async fn crawl_devto_runs_and_reports() {
    let (app, store) = test_router(None);
    let (status, body) = call(app, "POST", "/crawl/devto").await;
    assert_eq!(status, StatusCode::OK);

    let reports: Json = serde_json::from_slice(&body).expect("json");
    let reports = reports.as_array().expect("array of reports");
    assert_eq!(reports.len(), 1);
    let r = &reports[0];
    assert_eq!(r["source"], "devto");
    assert_eq!(r["received"], 3);
    assert_eq!(r["malformed"], 1);
    assert_eq!(r["persisted"], 2);
    assert_eq!(r["timed_out"], false);

    let records: Vec<PersistedRecord> = store.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.title_ko.starts_with("요약 제목")));
}

#[tokio::test]
async fn unknown_selector_is_rejected() {
    let (app, store) = test_router(None);
    let (status, body) = call(app, "POST", "/crawl/myspace").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let err: Json = serde_json::from_slice(&body).unwrap();
    assert!(err["error"].as_str().unwrap().contains("myspace"));
    assert_eq!(store.lookup_calls(), 0);
}

#[tokio::test]
async fn llm_rankings_is_accepted_with_no_runs() {
    let (app, _) = test_router(None);
    let (status, body) = call(app, "POST", "/crawl/llm_rankings").await;
    assert_eq!(status, StatusCode::OK);
    let reports: Json = serde_json::from_slice(&body).unwrap();
    assert_eq!(reports, serde_json::json!([]));
}

#[tokio::test]
async fn unregistered_source_reports_a_fetch_failure() {
    let (app, _) = test_router(None);
    let (status, body) = call(app, "POST", "/crawl/hashnode").await;
    assert_eq!(status, StatusCode::OK);
    let reports: Json = serde_json::from_slice(&body).unwrap();
    let failures = reports[0]["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["stage"], "fetch");
}

#[tokio::test]
async fn completion_is_sent_to_the_notifier() {
    let (tx, rx) = oneshot::channel();
    let notifier: Arc<dyn RunNotifier> = Arc::new(CapturingNotifier {
        tx: Mutex::new(Some(tx)),
    });
    let (app, _) = test_router(Some(notifier));
    let (status, _) = call(app, "POST", "/crawl/all_blogs").await;
    assert_eq!(status, StatusCode::OK);

    let payload = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("notifier called")
        .expect("payload sent");
    assert_eq!(payload.selector, "all_blogs");
    assert_eq!(payload.reports.len(), 3);
    assert!(payload.job_id.starts_with("all_blogs-"));
}
