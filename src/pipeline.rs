//! Per-source pipeline run: normalize → dedup → summarize → score → persist.
//!
//! Only configuration problems stop a run from starting (see [`Pipeline::from_config`]).
//! Everything after that is absorbed into the [`RunReport`]; each dropped item is counted
//! under exactly one outcome and gets one [`FailureReason`].

use crate::config::PipelineConfig;
use crate::dedup::{self, DedupConfig};
use crate::error::ConfigError;
use crate::ingest::providers::SourceRegistry;
use crate::ingest::selector::SourceSelector;
use crate::ingest::types::{RawRecord, Source, SourceProvider};
use crate::ingest::normalize_batch;
use crate::persist::Persister;
use crate::scorer::Scorer;
use crate::source_weights::SourceWeightsConfig;
use crate::store::{ArticleStore, UpsertOutcome};
use crate::summarize::LlmClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_received_total", "Raw records handed to the pipeline.");
        describe_counter!("pipeline_malformed_total", "Raw records rejected by the normalizer.");
        describe_counter!(
            "pipeline_duplicates_total",
            "Candidates dropped as in-batch or already-persisted duplicates."
        );
        describe_counter!(
            "pipeline_dedup_unverified_total",
            "Candidates excluded because the persisted lookup failed or timed out."
        );
        describe_counter!("pipeline_summarized_total", "Candidates with a validated summary.");
        describe_counter!(
            "pipeline_summary_dropped_total",
            "Candidates dropped by summarization (gate, provider failure, non-technical)."
        );
        describe_counter!("pipeline_persisted_total", "Records inserted.");
        describe_counter!("pipeline_persist_failed_total", "Record writes that failed.");
        describe_counter!("llm_batch_failures_total", "LLM batches that produced no results.");
        describe_counter!("source_provider_errors_total", "Source fetch/parse errors.");
        describe_counter!("ingest_runs_total", "Scheduled selector runs.");
        describe_histogram!("llm_batch_ms", "LLM batch latency in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when a pipeline run last finished.");
        describe_gauge!("llm_batch_size", "Configured items per LLM request.");
        describe_gauge!("llm_concurrency", "Configured max in-flight LLM requests.");
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Normalize,
    Dedup,
    Summarize,
    Persist,
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReason {
    pub stage: Stage,
    pub url: Option<String>,
    pub reason: String,
}

/// Outcome of one pipeline run for one source.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub source: Source,
    pub received: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub dedup_unverified: usize,
    /// Survivors of dedup.
    pub deduplicated: usize,
    /// Passed the quality gate (technical or not).
    pub summarized: usize,
    pub summary_failed: usize,
    pub non_technical: usize,
    pub scored: usize,
    pub persisted: usize,
    pub already_existed: usize,
    pub persist_failed: usize,
    pub failures: Vec<FailureReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timed_out: bool,
}

impl RunReport {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            received: 0,
            malformed: 0,
            duplicates: 0,
            dedup_unverified: 0,
            deduplicated: 0,
            summarized: 0,
            summary_failed: 0,
            non_technical: 0,
            scored: 0,
            persisted: 0,
            already_existed: 0,
            persist_failed: 0,
            failures: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            timed_out: false,
        }
    }

    fn fail(&mut self, stage: Stage, url: Option<String>, reason: impl Into<String>) {
        self.failures.push(FailureReason {
            stage,
            url,
            reason: reason.into(),
        });
    }

    /// Items summarization removed from the run.
    pub fn dropped_in_summarization(&self) -> usize {
        self.summary_failed + self.non_technical
    }
}

/// Everything one run needs. Built once per process and shared across runs.
pub struct Pipeline {
    llm: LlmClient,
    store: Arc<dyn ArticleStore>,
    scorer: Scorer,
    persister: Persister,
    dedup: DedupConfig,
    run_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        llm: LlmClient,
        store: Arc<dyn ArticleStore>,
        scorer: Scorer,
        dedup: DedupConfig,
        write_timeout: Duration,
        run_timeout: Duration,
    ) -> Self {
        ensure_metrics_described();
        Self {
            persister: Persister::new(store.clone(), write_timeout),
            llm,
            store,
            scorer,
            dedup,
            run_timeout,
        }
    }

    /// Validate config and build the LLM client. No network traffic happens here.
    pub fn from_config(cfg: &PipelineConfig, store: Arc<dyn ArticleStore>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let llm = cfg.llm.build_client()?;
        let weights = SourceWeightsConfig::load_from_file(&cfg.scoring.source_weights_path);
        Ok(Self::new(
            llm,
            store,
            Scorer::new(weights, cfg.decay_settings()),
            cfg.dedup_config(),
            cfg.write_timeout(),
            cfg.run_timeout(),
        ))
    }

    pub fn store(&self) -> &Arc<dyn ArticleStore> {
        &self.store
    }

    /// Run already-fetched records, bounded by the run timeout.
    pub async fn run(&self, source: Source, raw: Vec<RawRecord>) -> RunReport {
        let mut report = RunReport::new(source);
        let res = tokio::time::timeout(self.run_timeout, self.execute(source, raw, &mut report)).await;
        self.finish(report, res.is_err())
    }

    /// Fetch from `provider` and run, both inside the run timeout.
    pub async fn run_provider(&self, provider: &dyn SourceProvider) -> RunReport {
        let source = provider.source();
        let mut report = RunReport::new(source);
        let work = async {
            match provider.fetch_candidates().await {
                Ok(raw) => self.execute(source, raw, &mut report).await,
                Err(e) => {
                    warn!(target: "pipeline", %source, error = ?e, "source fetch failed");
                    counter!("source_provider_errors_total", "source" => source.as_str()).increment(1);
                    report.fail(Stage::Fetch, None, format!("{e:#}"));
                }
            }
        };
        let res = tokio::time::timeout(self.run_timeout, work).await;
        self.finish(report, res.is_err())
    }

    /// One run per selected source, concurrently. Runs don't share anything but the store.
    pub async fn run_selector(&self, selector: SourceSelector, registry: &SourceRegistry) -> Vec<RunReport> {
        let sources = selector.sources();
        if sources.is_empty() {
            info!(target: "pipeline", %selector, "selector has no article sources");
            return Vec::new();
        }
        let runs = sources.into_iter().map(|source| async move {
            match registry.get(source) {
                Some(provider) => self.run_provider(provider.as_ref()).await,
                None => {
                    warn!(target: "pipeline", %source, "no provider registered");
                    let mut report = RunReport::new(source);
                    report.fail(Stage::Fetch, None, "no provider registered for source");
                    self.finish(report, false)
                }
            }
        });
        join_all(runs).await
    }

    fn finish(&self, mut report: RunReport, timed_out: bool) -> RunReport {
        if timed_out {
            warn!(target: "pipeline", source = %report.source, timeout = ?self.run_timeout, "run timed out");
            report.timed_out = true;
            report.fail(Stage::Run, None, format!("run timed out after {:?}", self.run_timeout));
        }
        let now = Utc::now();
        report.finished_at = Some(now);
        gauge!("pipeline_last_run_ts").set(now.timestamp() as f64);
        info!(
            target: "pipeline",
            source = %report.source,
            received = report.received,
            malformed = report.malformed,
            duplicates = report.duplicates,
            unverified = report.dedup_unverified,
            summarized = report.summarized,
            dropped = report.dropped_in_summarization(),
            persisted = report.persisted,
            persist_failed = report.persist_failed,
            timed_out = report.timed_out,
            "run finished"
        );
        report
    }

    async fn execute(&self, source: Source, raw: Vec<RawRecord>, report: &mut RunReport) {
        let src = source.as_str();
        report.received = raw.len();
        counter!("pipeline_received_total", "source" => src).increment(raw.len() as u64);

        // Normalize
        let (candidates, malformed) = normalize_batch(source, raw);
        report.malformed = malformed.len();
        counter!("pipeline_malformed_total", "source" => src).increment(malformed.len() as u64);
        for (url, e) in malformed {
            report.fail(Stage::Normalize, url, e.to_string());
        }

        // Dedup
        let outcome = dedup::deduplicate(candidates, self.store.as_ref(), &self.dedup).await;
        report.duplicates = outcome.batch_duplicates.len() + outcome.existing.len();
        report.dedup_unverified = outcome.unverified.len();
        report.deduplicated = outcome.kept.len();
        counter!("pipeline_duplicates_total", "source" => src).increment(report.duplicates as u64);
        counter!("pipeline_dedup_unverified_total", "source" => src).increment(report.dedup_unverified as u64);
        for item in outcome.batch_duplicates {
            report.fail(Stage::Dedup, Some(item.url), "duplicate in batch");
        }
        for item in outcome.existing {
            report.fail(Stage::Dedup, Some(item.url), "already persisted");
        }
        for (item, reason) in outcome.unverified {
            report.fail(Stage::Dedup, Some(item.url), reason);
        }
        let survivors = outcome.kept;
        if survivors.is_empty() {
            return;
        }

        // Summarize
        let summaries = self.llm.summarize_all(&survivors).await;
        let mut reasons: HashMap<String, String> = summaries.rejected.into_iter().collect();
        for batch in summaries.failed_batches {
            for url in batch.urls {
                reasons.insert(url, batch.reason.clone());
            }
        }

        let now = Utc::now();
        let mut scored = Vec::new();
        for (item, result) in survivors.into_iter().zip(summaries.results) {
            match result {
                None => {
                    report.summary_failed += 1;
                    let reason = reasons
                        .remove(&item.url)
                        .unwrap_or_else(|| "no valid summary".to_string());
                    report.fail(Stage::Summarize, Some(item.url), reason);
                }
                Some(summary) => {
                    report.summarized += 1;
                    if !summary.is_technical {
                        report.non_technical += 1;
                        report.fail(Stage::Summarize, Some(item.url), "not technical content");
                        continue;
                    }
                    scored.push(self.scorer.score(item, summary, now));
                }
            }
        }
        report.scored = scored.len();
        counter!("pipeline_summarized_total", "source" => src).increment(report.summarized as u64);
        counter!("pipeline_summary_dropped_total", "source" => src)
            .increment(report.dropped_in_summarization() as u64);

        // Persist; counts are updated per item so a timed-out run still reports its writes.
        for item in &scored {
            match self.persister.persist_one(item).await {
                Ok(UpsertOutcome::Inserted) => {
                    report.persisted += 1;
                    counter!("pipeline_persisted_total", "source" => src).increment(1);
                }
                Ok(UpsertOutcome::AlreadyExists) => {
                    // Lost a race with a concurrent run.
                    report.already_existed += 1;
                    report.fail(Stage::Persist, Some(item.item.url.clone()), "already persisted");
                }
                Err(reason) => {
                    report.persist_failed += 1;
                    counter!("pipeline_persist_failed_total", "source" => src).increment(1);
                    report.fail(Stage::Persist, Some(item.item.url.clone()), reason);
                }
            }
        }
    }
}
