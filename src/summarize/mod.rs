//! Korean summarization: batching, provider calls, and the quality gate.
//!
//! [`LlmClient::summarize`] handles one batch and always returns a vector aligned with its
//! input. [`LlmClient::summarize_all`] splits the survivors of dedup into batches of the
//! configured size and runs them with bounded concurrency.

pub mod parse;
pub mod prompt;
pub mod providers;

use crate::error::ProviderError;
use crate::ingest::types::CandidateItem;
use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};
use parse::RawSummary;
use providers::{LlmTransport, ProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    AiLlm,
    DevopsSre,
    InfraCloud,
    Database,
    Blockchain,
    Security,
    DataScience,
    Architecture,
    Mobile,
    Frontend,
    Backend,
    Other,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::AiLlm,
        Category::DevopsSre,
        Category::InfraCloud,
        Category::Database,
        Category::Blockchain,
        Category::Security,
        Category::DataScience,
        Category::Architecture,
        Category::Mobile,
        Category::Frontend,
        Category::Backend,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::AiLlm => "AI_LLM",
            Category::DevopsSre => "DEVOPS_SRE",
            Category::InfraCloud => "INFRA_CLOUD",
            Category::Database => "DATABASE",
            Category::Blockchain => "BLOCKCHAIN",
            Category::Security => "SECURITY",
            Category::DataScience => "DATA_SCIENCE",
            Category::Architecture => "ARCHITECTURE",
            Category::Mobile => "MOBILE",
            Category::Frontend => "FRONTEND",
            Category::Backend => "BACKEND",
            Category::Other => "OTHER",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts `AI_LLM`, `ai-llm`, `ai llm` and the like.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canon = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == canon)
            .ok_or_else(|| format!("unknown category: {s:?}"))
    }
}

/// Validated summary for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryResult {
    pub korean_title: String,
    pub korean_summary: String,
    pub category: Category,
    pub tags: BTreeSet<String>,
    pub is_technical: bool,
}

/// Lower-case, spaces to hyphens, drop empties and duplicates. Keeps first-seen order.
pub fn clean_tags(tags: &serde_json::Value) -> Vec<String> {
    let raw: Vec<&str> = match tags {
        serde_json::Value::Array(items) => items.iter().filter_map(|v| v.as_str()).collect(),
        serde_json::Value::String(s) => s.split(',').collect(),
        _ => Vec::new(),
    };
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in raw {
        let t = tag
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        if !t.is_empty() && seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

/// The quality gate. Returns the reason when an answer is rejected.
pub fn validate(raw: RawSummary, max_tags: usize) -> Result<SummaryResult, String> {
    let title = raw.title_ko.as_deref().map(str::trim).unwrap_or_default();
    if title.is_empty() {
        return Err("empty korean title".into());
    }
    let summary = raw.summary_ko.as_deref().map(str::trim).unwrap_or_default();
    if summary.is_empty() {
        return Err("empty korean summary".into());
    }
    let category: Category = raw
        .category
        .as_deref()
        .ok_or_else(|| "missing category".to_string())?
        .parse()?;
    let tags = clean_tags(&raw.tags);
    if tags.is_empty() || tags.len() > max_tags {
        return Err(format!("tag count {} outside 1..={max_tags}", tags.len()));
    }
    Ok(SummaryResult {
        korean_title: title.chars().take(prompt::MAX_TITLE_KO_CHARS).collect(),
        korean_summary: summary.to_string(),
        category,
        tags: tags.into_iter().collect(),
        // Missing flag counts as non-technical.
        is_technical: raw.is_technical.unwrap_or(false),
    })
}

/// Resolved summarization settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub max_tags: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Gemini,
            batch_size: 2,
            concurrency: 2,
            timeout: Duration::from_secs(120),
            max_tags: 5,
        }
    }
}

/// A batch that produced no results, for the run report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch: usize,
    pub urls: Vec<String>,
    pub reason: String,
}

/// Result of [`LlmClient::summarize_all`]; `results` is aligned with the input.
#[derive(Debug, Default)]
pub struct SummarizeOutcome {
    pub results: Vec<Option<SummaryResult>>,
    pub failed_batches: Vec<BatchFailure>,
    /// Per-item gate rejections: (url, reason).
    pub rejected: Vec<(String, String)>,
    pub quota_exhausted: bool,
}

/// Constructed once per process and shared by every run.
#[derive(Clone)]
pub struct LlmClient {
    transport: Arc<dyn LlmTransport>,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(transport: Arc<dyn LlmTransport>, settings: LlmSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    pub fn provider_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Summarize one batch. Any provider failure yields all-`None`.
    pub async fn summarize(&self, batch: &[CandidateItem]) -> Vec<Option<SummaryResult>> {
        match self.try_batch(batch).await {
            Ok((results, _)) => results,
            Err(e) => {
                warn!(target: "summarize", error = %e, size = batch.len(), "batch failed");
                vec![None; batch.len()]
            }
        }
    }

    async fn try_batch(
        &self,
        batch: &[CandidateItem],
    ) -> Result<(Vec<Option<SummaryResult>>, Vec<(String, String)>), ProviderError> {
        if batch.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let prompt = prompt::build_batch_prompt(batch);
        let content = tokio::time::timeout(self.settings.timeout, self.transport.complete(&prompt))
            .await
            .map_err(|_| ProviderError::Timeout(self.settings.timeout))??;
        let slots = parse::parse_batch_response(&content, &prompt.urls)?;

        let mut rejected = Vec::new();
        let results = slots
            .into_iter()
            .zip(batch)
            .map(|(slot, item)| {
                let Some(raw) = slot else {
                    rejected.push((item.url.clone(), "no answer for item".to_string()));
                    return None;
                };
                match validate(raw, self.settings.max_tags) {
                    Ok(r) => Some(r),
                    Err(reason) => {
                        debug!(target: "summarize", url = %item.url, %reason, "answer rejected");
                        rejected.push((item.url.clone(), reason));
                        None
                    }
                }
            })
            .collect();
        Ok((results, rejected))
    }

    /// Summarize everything, `batch_size` items per request, at most `concurrency` in flight.
    ///
    /// A quota error stops every batch that has not started yet; finished batches are kept.
    pub async fn summarize_all(&self, items: &[CandidateItem]) -> SummarizeOutcome {
        let size = self.settings.batch_size.max(1);
        let breaker = AtomicBool::new(false);

        // Collected up front so the returned future stays `Send`.
        let batches: Vec<_> = items
            .chunks(size)
            .enumerate()
            .map(|(idx, chunk)| {
                let breaker = &breaker;
                async move {
                    if breaker.load(Ordering::SeqCst) {
                        return (idx, chunk, Err("skipped: provider quota exhausted".to_string()));
                    }
                    let started = Instant::now();
                    let res = self.try_batch(chunk).await;
                    histogram!("llm_batch_ms").record(started.elapsed().as_secs_f64() * 1000.0);
                    let res = res.map_err(|e| {
                        if matches!(e, ProviderError::QuotaExceeded(_)) {
                            breaker.store(true, Ordering::SeqCst);
                        }
                        e.to_string()
                    });
                    (idx, chunk, res)
                }
            })
            .collect();

        let mut out = SummarizeOutcome {
            results: vec![None; items.len()],
            ..Default::default()
        };
        let mut finished = stream::iter(batches).buffer_unordered(self.settings.concurrency.max(1));
        while let Some((idx, chunk, res)) = finished.next().await {
            match res {
                Ok((results, rejected)) => {
                    for (offset, r) in results.into_iter().enumerate() {
                        out.results[idx * size + offset] = r;
                    }
                    out.rejected.extend(rejected);
                }
                Err(reason) => {
                    counter!("llm_batch_failures_total").increment(1);
                    warn!(target: "summarize", batch = idx, size = chunk.len(), %reason, "batch produced no results");
                    out.failed_batches.push(BatchFailure {
                        batch: idx,
                        urls: chunk.iter().map(|i| i.url.clone()).collect(),
                        reason,
                    });
                }
            }
        }
        drop(finished);
        out.failed_batches.sort_by_key(|f| f.batch);
        out.quota_exhausted = breaker.load(Ordering::SeqCst);

        let ok = out.results.iter().filter(|r| r.is_some()).count();
        info!(
            target: "summarize",
            provider = self.transport.name(),
            items = items.len(),
            summarized = ok,
            failed_batches = out.failed_batches.len(),
            quota_exhausted = out.quota_exhausted,
            "summarization finished"
        );
        out
    }
}
