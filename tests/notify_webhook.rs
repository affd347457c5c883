// tests/notify_webhook.rs
// WebhookNotifier against a local listener on an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devport_ingest::ingest::types::Source;
use devport_ingest::notify::{CompletionPayload, RunNotifier, WebhookNotifier};
use devport_ingest::RunReport;
use shuttle_axum::axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tokio::net::TcpListener;

const SECRET: &str = "hook-secret";

/// Independent HMAC over the body with its `signature` field removed.
fn expected_signature(body: &serde_json::Value) -> String {
    use hmac::{Hmac, Mac};
    let mut unsigned = body.clone();
    unsigned.as_object_mut().unwrap().remove("signature");
    let canonical = serde_json::to_string(&unsigned).unwrap();
    let mut mac = Hmac::<sha2::Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Clone)]
struct Hook {
    hits: Arc<AtomicUsize>,
    /// Requests answered with 500 before the first 200.
    fail_first: usize,
    last_body: Arc<parking_lot::Mutex<Option<serde_json::Value>>>,
}

async fn receive(State(hook): State<Hook>, Json(body): Json<serde_json::Value>) -> StatusCode {
    let n = hook.hits.fetch_add(1, Ordering::SeqCst);
    *hook.last_body.lock() = Some(body);
    if n < hook.fail_first {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

async fn serve(fail_first: usize) -> (SocketAddr, Hook) {
    let hook = Hook {
        hits: Arc::new(AtomicUsize::new(0)),
        fail_first,
        last_body: Arc::new(parking_lot::Mutex::new(None)),
    };
    let app = Router::new()
        .route("/hook", post(receive))
        .with_state(hook.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        shuttle_axum::axum::serve(listener, app).await.unwrap();
    });
    (addr, hook)
}

fn payload() -> CompletionPayload {
    CompletionPayload::new("devto", vec![RunReport::new(Source::Devto)])
}

#[tokio::test]
async fn retries_until_the_receiver_accepts() {
    let (addr, hook) = serve(2).await;
    let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), SECRET)
        .with_retries(3)
        .with_backoff(Duration::from_millis(10));

    notifier.notify(&payload()).await.expect("delivered on third attempt");
    assert_eq!(hook.hits.load(Ordering::SeqCst), 3);

    let body = hook.last_body.lock().clone().unwrap();
    assert_eq!(body["selector"], "devto");
    assert_eq!(body["reports"][0]["source"], "devto");
    assert_eq!(body["signature"], expected_signature(&body));
}

#[tokio::test]
async fn receiver_can_reject_a_wrong_secret() {
    let (addr, hook) = serve(0).await;
    let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), "not-the-secret");
    notifier.notify(&payload()).await.unwrap();

    let body = hook.last_body.lock().clone().unwrap();
    assert!(body["signature"].is_string());
    assert_ne!(body["signature"], expected_signature(&body));
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (addr, hook) = serve(usize::MAX).await;
    let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), SECRET)
        .with_retries(2)
        .with_backoff(Duration::from_millis(10));

    let err = notifier.notify(&payload()).await.unwrap_err();
    assert!(err.to_string().contains("after 2 attempts"));
    assert_eq!(hook.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unreachable_receiver_is_an_error_not_a_panic() {
    // Bind then drop to get a port nobody listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let notifier = WebhookNotifier::new(format!("http://{addr}/hook"), SECRET)
        .with_retries(1)
        .with_timeout(Duration::from_secs(2));
    assert!(notifier.notify(&payload()).await.is_err());
}
