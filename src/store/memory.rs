//! In-process store for local runs and tests, with fault injection.

use super::{ArticleStore, PersistedRecord, RecordKey, UpsertOutcome};
use crate::error::StoreError;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Inner {
    records: Vec<PersistedRecord>,
    url_keys: HashSet<String>,
    content_hashes: HashSet<String>,
    external_ids: HashSet<(String, String)>,
}

impl Inner {
    fn contains(&self, key: &RecordKey) -> bool {
        self.url_keys.contains(&key.url_key)
            || self.content_hashes.contains(&key.content_hash)
            || self
                .external_ids
                .contains(&(key.source.as_str().to_string(), key.external_id.clone()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    lookup_delay: Option<Duration>,
    fail_lookups: bool,
    failing_urls: HashSet<String>,
    lookup_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `existing` call sleeps this long first (to exercise lookup timeouts).
    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    /// Every `existing` call fails.
    pub fn with_failing_lookups(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    /// Writes for this url fail with `StoreError::Unavailable`.
    pub fn with_failing_write(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.insert(url.into());
        self
    }

    pub fn records(&self) -> Vec<PersistedRecord> {
        self.inner.lock().expect("store mutex poisoned").records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("store mutex poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ArticleStore for MemoryStore {
    async fn existing(&self, keys: &[RecordKey]) -> Result<Vec<bool>, StoreError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_lookups {
            return Err(StoreError::Unavailable("lookup disabled".into()));
        }
        let inner = self.inner.lock().expect("store mutex poisoned");
        Ok(keys.iter().map(|k| inner.contains(k)).collect())
    }

    async fn upsert(&self, record: &PersistedRecord) -> Result<UpsertOutcome, StoreError> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_urls.contains(&record.url) {
            return Err(StoreError::Unavailable(format!("write rejected for {}", record.url)));
        }
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let key = record.key();
        if inner.contains(&key) {
            return Ok(UpsertOutcome::AlreadyExists);
        }
        inner.url_keys.insert(key.url_key);
        inner.content_hashes.insert(key.content_hash);
        inner
            .external_ids
            .insert((key.source.as_str().to_string(), key.external_id));
        inner.records.push(record.clone());
        Ok(UpsertOutcome::Inserted)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
