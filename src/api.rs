use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::ingest::providers::SourceRegistry;
use crate::ingest::selector::SourceSelector;
use crate::notify::{CompletionPayload, RunNotifier};
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub registry: Arc<SourceRegistry>,
    pub notifier: Option<Arc<dyn RunNotifier>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/crawl/{selector}", post(crawl))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Runs every source the selector names and answers with their reports.
/// The completion webhook is sent in the background.
async fn crawl(State(state): State<AppState>, Path(selector): Path<String>) -> Response {
    let parsed: SourceSelector = match selector.parse() {
        Ok(s) => s,
        Err(e) => {
            warn!(%selector, "rejected crawl trigger");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    info!(selector = %parsed, "crawl triggered");
    let reports = state.pipeline.run_selector(parsed, &state.registry).await;

    if let Some(notifier) = state.notifier.clone() {
        let payload = CompletionPayload::new(parsed.to_string(), reports.clone());
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&payload).await {
                warn!(error = ?e, job_id = %payload.job_id, "completion webhook not delivered");
            }
        });
    }

    Json(reports).into_response()
}
