//! # Deduplicator
//!
//! Filters candidates against each other (same batch) and against already persisted records.
//!
//! Fingerprint = normalized URL key + SHA-256 over normalized `title \n body`. Two items are
//! duplicates when either half matches, or when they share `(source, external_id)`.
//! Survivors keep their input order. Persisted-store lookups are chunked and bounded by a
//! timeout; a chunk whose lookup fails is excluded from the run (fail-closed).

use crate::ingest::types::CandidateItem;
use crate::store::{ArticleStore, RecordKey};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Query parameters that only track referrers and never change the content.
const TRACKING_PARAMS: &[&str] = &["ref", "source", "fbclid", "gclid", "mc_cid", "mc_eid"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContentFingerprint {
    pub url_key: String,
    pub content_hash: String,
}

impl ContentFingerprint {
    pub fn of(item: &CandidateItem) -> Self {
        Self {
            url_key: url_key(&item.url),
            content_hash: content_hash(&item.raw_title, &item.raw_body),
        }
    }
}

/// Canonical URL form used for equality. Falls back to the trimmed lower-cased input when
/// the url does not parse.
pub fn url_key(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = url::Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_ascii_lowercase();
    };

    let host = parsed
        .host_str()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();

    let mut out = format!("https://{host}");
    if let Some(port) = parsed.port() {
        if port != 80 && port != 443 {
            out.push_str(&format!(":{port}"));
        }
    }
    out.push_str(parsed.path().trim_end_matches('/'));

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !params.is_empty() {
        params.sort();
        let query: Vec<String> = params
            .into_iter()
            .map(|(k, v)| if v.is_empty() { k } else { format!("{k}={v}") })
            .collect();
        out.push('?');
        out.push_str(&query.join("&"));
    }
    out
}

/// Hex SHA-256 over lower-cased, whitespace-collapsed `title \n body`.
pub fn content_hash(title: &str, body: &str) -> String {
    let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(norm(title).as_bytes());
    hasher.update(b"\n");
    hasher.update(norm(body).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Max keys per persisted-store lookup call.
    pub lookup_chunk_size: usize,
    pub lookup_timeout: Duration,
    /// When set, titles at least this similar (0..=1) are treated as duplicates in a batch.
    pub title_similarity_threshold: Option<f64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lookup_chunk_size: 100,
            lookup_timeout: Duration::from_secs(10),
            title_similarity_threshold: None,
        }
    }
}

/// What the deduplicator did with each input item.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub kept: Vec<CandidateItem>,
    /// Lost to a better copy in the same batch.
    pub batch_duplicates: Vec<CandidateItem>,
    /// Already persisted.
    pub existing: Vec<CandidateItem>,
    /// Lookup failed or timed out; excluded from this run.
    pub unverified: Vec<(CandidateItem, String)>,
}

fn batch_keys(item: &CandidateItem, fp: &ContentFingerprint) -> [String; 3] {
    [
        format!("u:{}", fp.url_key),
        format!("c:{}", fp.content_hash),
        format!("e:{}:{}", item.source, item.external_id),
    ]
}

/// Remove intra-batch duplicates. For a duplicate group the item with the greater engagement
/// wins, ties go to the earliest `published_at`, then to input order. Survivors keep input order.
pub fn dedup_in_batch(
    items: Vec<CandidateItem>,
    title_similarity_threshold: Option<f64>,
) -> (Vec<CandidateItem>, Vec<CandidateItem>) {
    let fps: Vec<ContentFingerprint> = items.iter().map(ContentFingerprint::of).collect();

    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by(|&a, &b| {
        items[b]
            .engagement_count
            .cmp(&items[a].engagement_count)
            .then_with(|| items[a].published_at.cmp(&items[b].published_at))
    });

    let mut seen: HashSet<String> = HashSet::new();
    let mut kept_titles: Vec<String> = Vec::new();
    let mut keep = vec![false; items.len()];

    for idx in order {
        let keys = batch_keys(&items[idx], &fps[idx]);
        if keys.iter().any(|k| seen.contains(k)) {
            debug!(target: "dedup", url = %items[idx].url, "duplicate in batch");
            continue;
        }
        let title = items[idx].raw_title.to_lowercase();
        if let Some(threshold) = title_similarity_threshold {
            if kept_titles
                .iter()
                .any(|t| strsim::normalized_levenshtein(t, &title) >= threshold)
            {
                debug!(target: "dedup", url = %items[idx].url, "near-duplicate title in batch");
                continue;
            }
        }
        seen.extend(keys);
        kept_titles.push(title);
        keep[idx] = true;
    }

    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for (item, k) in items.into_iter().zip(keep) {
        if k {
            kept.push(item);
        } else {
            dropped.push(item);
        }
    }
    (kept, dropped)
}

/// Full dedup pass: in-batch first, then one bounded lookup per chunk against the store.
pub async fn deduplicate(
    items: Vec<CandidateItem>,
    store: &dyn ArticleStore,
    cfg: &DedupConfig,
) -> DedupOutcome {
    let mut outcome = DedupOutcome::default();
    if items.is_empty() {
        return outcome;
    }

    let (unique, dropped) = dedup_in_batch(items, cfg.title_similarity_threshold);
    outcome.batch_duplicates = dropped;

    let chunk_size = cfg.lookup_chunk_size.max(1);
    let mut pending = unique.into_iter().peekable();
    while pending.peek().is_some() {
        let chunk: Vec<CandidateItem> = pending.by_ref().take(chunk_size).collect();
        let keys: Vec<RecordKey> = chunk.iter().map(RecordKey::of).collect();

        let verdict = match tokio::time::timeout(cfg.lookup_timeout, store.existing(&keys)).await
        {
            Ok(Ok(flags)) if flags.len() == keys.len() => Ok(flags),
            Ok(Ok(flags)) => Err(format!(
                "lookup returned {} flags for {} keys",
                flags.len(),
                keys.len()
            )),
            Ok(Err(e)) => Err(format!("lookup failed: {e}")),
            Err(_) => Err(format!("lookup timed out after {:?}", cfg.lookup_timeout)),
        };

        match verdict {
            Ok(flags) => {
                for (item, exists) in chunk.into_iter().zip(flags) {
                    if exists {
                        debug!(target: "dedup", url = %item.url, "already persisted");
                        outcome.existing.push(item);
                    } else {
                        outcome.kept.push(item);
                    }
                }
            }
            Err(reason) => {
                warn!(target: "dedup", items = chunk.len(), %reason, "excluding unverified chunk");
                outcome
                    .unverified
                    .extend(chunk.into_iter().map(|item| (item, reason.clone())));
            }
        }
    }

    outcome
}
