//! Persister: idempotent, sequential upserts of scored items.

use crate::dedup::ContentFingerprint;
use crate::scorer::ScoredItem;
use crate::store::{ArticleStore, PersistedRecord, UpsertOutcome};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

impl From<&ScoredItem> for PersistedRecord {
    fn from(s: &ScoredItem) -> Self {
        let fp = ContentFingerprint::of(&s.item);
        PersistedRecord {
            source: s.item.source,
            external_id: s.item.external_id.clone(),
            item_type: s.item.source.item_type(),
            url: s.item.url.clone(),
            url_key: fp.url_key,
            content_hash: fp.content_hash,
            title_en: s.item.raw_title.clone(),
            title_ko: s.summary.korean_title.clone(),
            summary_ko: s.summary.korean_summary.clone(),
            category: s.summary.category,
            tags: s.summary.tags.iter().cloned().collect(),
            score: s.score,
            engagement_count: i64::try_from(s.item.engagement_count).unwrap_or(i64::MAX),
            comment_count: i64::try_from(s.item.comment_count).unwrap_or(i64::MAX),
            published_at: s.item.published_at,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub already_existed: usize,
    /// (url, reason) per failed write.
    pub failures: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct Persister {
    store: Arc<dyn ArticleStore>,
    write_timeout: Duration,
}

impl Persister {
    pub fn new(store: Arc<dyn ArticleStore>, write_timeout: Duration) -> Self {
        Self {
            store,
            write_timeout,
        }
    }

    /// Write one item under the write timeout. Errors come back as a loggable reason.
    pub async fn persist_one(&self, scored: &ScoredItem) -> Result<UpsertOutcome, String> {
        let record = PersistedRecord::from(scored);
        match tokio::time::timeout(self.write_timeout, self.store.upsert(&record)).await {
            Ok(Ok(outcome)) => {
                debug!(target: "persist", url = %record.url, score = record.score, ?outcome, "written");
                Ok(outcome)
            }
            Ok(Err(e)) => {
                warn!(target: "persist", url = %record.url, error = %e, store = self.store.name(), "write failed");
                Err(e.to_string())
            }
            Err(_) => {
                warn!(target: "persist", url = %record.url, timeout = ?self.write_timeout, "write timed out");
                Err(format!("write timed out after {:?}", self.write_timeout))
            }
        }
    }

    /// One write per item; a failed or timed-out write is skipped and the rest continue.
    pub async fn persist(&self, items: &[ScoredItem]) -> PersistOutcome {
        let mut out = PersistOutcome::default();
        for scored in items {
            match self.persist_one(scored).await {
                Ok(UpsertOutcome::Inserted) => out.inserted += 1,
                Ok(UpsertOutcome::AlreadyExists) => out.already_existed += 1,
                Err(reason) => out.failures.push((scored.item.url.clone(), reason)),
            }
        }
        out
    }
}
