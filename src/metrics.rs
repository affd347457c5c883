//! Prometheus exposition for the ingest service.

use anyhow::Context;
use metrics::gauge;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use shuttle_axum::axum::{extract::State, routing::get, Router};

use crate::config::PipelineConfig;

/// LLM batches take seconds to minutes; the default buckets top out far too low.
const LLM_BATCH_BUCKETS_MS: &[f64] = &[
    250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0, 60_000.0, 120_000.0,
];
const PARSE_BUCKETS_MS: &[f64] = &[0.5, 1.0, 5.0, 10.0, 50.0, 100.0, 500.0];

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder, register descriptions and publish the static
    /// summarization settings as gauges.
    ///
    /// Must run before the pipeline is built, otherwise the descriptions are lost.
    pub fn init(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full("llm_batch_ms".into()), LLM_BATCH_BUCKETS_MS)
            .context("prometheus: llm_batch_ms buckets")?
            .set_buckets_for_metric(Matcher::Full("ingest_parse_ms".into()), PARSE_BUCKETS_MS)
            .context("prometheus: ingest_parse_ms buckets")?
            .install_recorder()
            .context("prometheus: install recorder")?;

        crate::pipeline::ensure_metrics_described();
        gauge!("llm_batch_size").set(cfg.llm.batch_size as f64);
        gauge!("llm_concurrency").set(cfg.llm.concurrency as f64);

        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus text format.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render))
            .with_state(self.handle.clone())
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
