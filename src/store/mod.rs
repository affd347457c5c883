//! Persisted-record store capability.
//!
//! The store is the only resource shared between concurrent pipeline runs. Uniqueness is
//! enforced on `url_key`, `content_hash` and `(source, external_id)`; every write is an
//! insert-if-absent so concurrent runs can't create duplicates.

pub mod memory;
pub mod postgres;

use crate::dedup::ContentFingerprint;
use crate::error::StoreError;
use crate::ingest::types::{CandidateItem, ItemType, Source};
use crate::summarize::Category;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Everything a lookup needs to decide "already persisted".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub source: Source,
    pub external_id: String,
    pub url_key: String,
    pub content_hash: String,
}

impl RecordKey {
    pub fn of(item: &CandidateItem) -> Self {
        let fp = ContentFingerprint::of(item);
        Self {
            source: item.source,
            external_id: item.external_id.clone(),
            url_key: fp.url_key,
            content_hash: fp.content_hash,
        }
    }
}

/// Durable row. Built only from a scored item that carries a validated summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub source: Source,
    pub external_id: String,
    pub item_type: ItemType,
    pub url: String,
    pub url_key: String,
    pub content_hash: String,
    pub title_en: String,
    pub title_ko: String,
    pub summary_ko: String,
    pub category: Category,
    pub tags: Vec<String>,
    pub score: i64,
    pub engagement_count: i64,
    pub comment_count: i64,
    pub published_at: DateTime<Utc>,
}

impl PersistedRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            source: self.source,
            external_id: self.external_id.clone(),
            url_key: self.url_key.clone(),
            content_hash: self.content_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    AlreadyExists,
}

#[async_trait::async_trait]
pub trait ArticleStore: Send + Sync {
    /// Batched existence check. The result is aligned with `keys`.
    async fn existing(&self, keys: &[RecordKey]) -> Result<Vec<bool>, StoreError>;

    /// Insert unless a record with any of the same unique keys exists.
    async fn upsert(&self, record: &PersistedRecord) -> Result<UpsertOutcome, StoreError>;

    fn name(&self) -> &'static str;
}
