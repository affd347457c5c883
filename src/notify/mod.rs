//! Completion notifications for crawl triggers.

pub mod webhook;

pub use webhook::WebhookNotifier;

use crate::pipeline::RunReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Body POSTed once a trigger has finished every run it started.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionPayload {
    pub job_id: String,
    pub selector: String,
    pub completed_at: DateTime<Utc>,
    pub reports: Vec<RunReport>,
}

impl CompletionPayload {
    pub fn new(selector: impl Into<String>, reports: Vec<RunReport>) -> Self {
        let completed_at = Utc::now();
        let selector = selector.into();
        Self {
            job_id: format!("{selector}-{}", completed_at.timestamp_millis()),
            selector,
            completed_at,
            reports,
        }
    }
}

#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn notify(&self, payload: &CompletionPayload) -> anyhow::Result<()>;
}
