// src/ingest/scheduler.rs
use crate::ingest::providers::SourceRegistry;
use crate::ingest::selector::SourceSelector;
use crate::ingest::types::Source;
use crate::notify::{CompletionPayload, RunNotifier};
use crate::pipeline::Pipeline;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Selectors the periodic crawl runs on each tick.
pub fn default_selectors() -> Vec<SourceSelector> {
    vec![SourceSelector::AllBlogs, SourceSelector::Single(Source::Github)]
}

#[derive(Clone)]
pub struct SchedulerCfg {
    pub interval: Duration,
    pub selectors: Vec<SourceSelector>,
}

/// Spawn the periodic crawl. Selectors run one after another within a tick; a tick that
/// overruns the interval delays the next one instead of overlapping it.
pub fn spawn_scheduler(
    cfg: SchedulerCfg,
    pipeline: Arc<Pipeline>,
    registry: Arc<SourceRegistry>,
    notifier: Option<Arc<dyn RunNotifier>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for selector in &cfg.selectors {
                let reports = pipeline.run_selector(*selector, &registry).await;
                counter!("ingest_runs_total").increment(1);

                tracing::info!(
                    target: "ingest",
                    selector = %selector,
                    runs = reports.len(),
                    persisted = reports.iter().map(|r| r.persisted).sum::<usize>(),
                    "scheduled crawl tick"
                );

                if let Some(n) = &notifier {
                    let payload = CompletionPayload::new(selector.to_string(), reports);
                    if let Err(e) = n.notify(&payload).await {
                        tracing::warn!(error = ?e, "completion webhook not delivered");
                    }
                }
            }
        }
    })
}
