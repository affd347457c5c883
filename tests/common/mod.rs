// tests/common/mod.rs
// Shared builders for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use devport_ingest::dedup::{ContentFingerprint, DedupConfig};
use devport_ingest::ingest::types::{CandidateItem, RawRecord, Source};
use devport_ingest::scorer::Scorer;
use devport_ingest::store::{MemoryStore, PersistedRecord};
use devport_ingest::summarize::providers::MockTransport;
use devport_ingest::summarize::{Category, LlmClient, LlmSettings};
use devport_ingest::Pipeline;

pub fn hours_ago(h: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(h)
}

pub fn raw(url: &str, title: &str, engagement: u64) -> RawRecord {
    RawRecord {
        external_id: None,
        url: Some(url.to_string()),
        title: Some(title.to_string()),
        body: Some(format!("Body of {title}")),
        published_at: Some(hours_ago(6)),
        engagement: Some(engagement),
        comments: Some(2),
        tags: vec!["rust".into()],
    }
}

pub fn candidate(source: Source, ext: &str, url: &str, title: &str, engagement: u64) -> CandidateItem {
    CandidateItem {
        source,
        external_id: ext.to_string(),
        url: url.to_string(),
        raw_title: title.to_string(),
        raw_body: String::new(),
        published_at: hours_ago(3),
        engagement_count: engagement,
        comment_count: 0,
        source_tags: vec![],
    }
}

/// A record as if `item` had been persisted by an earlier run.
pub fn persisted(item: &CandidateItem) -> PersistedRecord {
    let fp = ContentFingerprint::of(item);
    PersistedRecord {
        source: item.source,
        external_id: item.external_id.clone(),
        item_type: item.source.item_type(),
        url: item.url.clone(),
        url_key: fp.url_key,
        content_hash: fp.content_hash,
        title_en: item.raw_title.clone(),
        title_ko: "제목".into(),
        summary_ko: "요약".into(),
        category: Category::Other,
        tags: vec!["misc".into()],
        score: 1,
        engagement_count: item.engagement_count as i64,
        comment_count: 0,
        published_at: item.published_at,
    }
}

pub fn settings(batch_size: usize, concurrency: usize) -> LlmSettings {
    LlmSettings {
        batch_size,
        concurrency,
        timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub store: Arc<MemoryStore>,
    pub llm: Arc<MockTransport>,
}

pub fn harness(llm: MockTransport, store: MemoryStore) -> Harness {
    harness_with(llm, store, settings(2, 2), DedupConfig::default(), Duration::from_secs(30))
}

pub fn harness_with(
    llm: MockTransport,
    store: MemoryStore,
    llm_settings: LlmSettings,
    dedup: DedupConfig,
    run_timeout: Duration,
) -> Harness {
    let llm = Arc::new(llm);
    let store = Arc::new(store);
    let pipeline = Pipeline::new(
        LlmClient::new(llm.clone(), llm_settings),
        store.clone(),
        Scorer::default(),
        dedup,
        Duration::from_secs(5),
        run_timeout,
    );
    Harness {
        pipeline,
        store,
        llm,
    }
}
