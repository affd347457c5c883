//! DevPort ingest service: binary entrypoint.
//! Loads config, builds the shared pipeline, starts the scheduler and serves the trigger API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use devport_ingest::api::{create_router, AppState};
use devport_ingest::ingest::providers::SourceRegistry;
use devport_ingest::ingest::scheduler::{default_selectors, spawn_scheduler, SchedulerCfg};
use devport_ingest::metrics::Metrics;
use devport_ingest::notify::{RunNotifier, WebhookNotifier};
use devport_ingest::store::{ArticleStore, MemoryStore, PgStore};
use devport_ingest::{Pipeline, PipelineConfig};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` filter (default `devport_ingest=info,warn`); `LOG_FORMAT=json` for JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devport_ingest=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    // Shuttle may already have installed a subscriber; keep theirs in that case.
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

async fn build_store(cfg: &PipelineConfig) -> anyhow::Result<Arc<dyn ArticleStore>> {
    match cfg.persist.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url, cfg.persist.max_connections)
                .await
                .context("connecting to postgres")?;
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Config errors are fatal: nothing starts with a bad provider or missing key.
    let cfg = PipelineConfig::load().context("loading pipeline config")?;
    // Recorder before the pipeline, so its metric descriptions are kept.
    let metrics = Metrics::init(&cfg)?;
    let store = build_store(&cfg).await?;
    let pipeline = Arc::new(Pipeline::from_config(&cfg, store).context("building pipeline")?);
    let registry = Arc::new(SourceRegistry::http_default()?);

    let notifier: Option<Arc<dyn RunNotifier>> =
        match (&cfg.notify.webhook_url, &cfg.notify.webhook_secret) {
            (Some(url), Some(secret)) => Some(Arc::new(
                WebhookNotifier::new(url.clone(), secret.clone())
                    .with_timeout(Duration::from_secs(cfg.notify.timeout_secs))
                    .with_retries(cfg.notify.max_retries),
            ) as Arc<dyn RunNotifier>),
            (Some(_), None) => {
                tracing::warn!("CRAWLER_WEBHOOK_SECRET not set, completion webhook disabled");
                None
            }
            _ => None,
        };

    if cfg.run.schedule_interval_secs > 0 {
        spawn_scheduler(
            SchedulerCfg {
                interval: Duration::from_secs(cfg.run.schedule_interval_secs),
                selectors: default_selectors(),
            },
            pipeline.clone(),
            registry.clone(),
            notifier.clone(),
        );
    }

    let router = create_router(AppState {
        pipeline,
        registry,
        notifier,
    })
    .merge(metrics.router());

    Ok(router.into())
}
