// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod selector;
pub mod types;

use crate::error::NormalizeError;
use crate::ingest::types::{CandidateItem, RawRecord, Source};
use once_cell::sync::OnceCell;
use regex::Regex;

pub const MAX_TITLE_CHARS: usize = 500;

/// Clean up scraped text: decode entities, strip tags, ASCII quotes, collapse whitespace,
/// then cap at `max_chars` (0 = no cap).
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z!][^>]*>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if max_chars > 0 && out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// Upgrade plain http to https and trim; the url is otherwise kept as published.
pub fn sanitize_url(url: &str) -> String {
    let url = url.trim();
    match url.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("http://") => format!("https://{}", &url[7..]),
        _ => url.to_string(),
    }
}

/// Build exactly one candidate from a raw record, or say why it can't be built.
pub fn normalize_record(source: Source, raw: RawRecord) -> Result<CandidateItem, NormalizeError> {
    let url = raw
        .url
        .as_deref()
        .map(sanitize_url)
        .filter(|u| !u.is_empty())
        .ok_or(NormalizeError::MissingUrl)?;
    let parsed = url::Url::parse(&url).map_err(|e| NormalizeError::InvalidUrl(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(NormalizeError::InvalidUrl(url));
    }

    let title = raw
        .title
        .as_deref()
        .map(|t| normalize_text(t, MAX_TITLE_CHARS))
        .filter(|t| !t.is_empty())
        .ok_or(NormalizeError::MissingTitle)?;
    let published_at = raw.published_at.ok_or(NormalizeError::MissingPublishedAt)?;

    let external_id = raw
        .external_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| crate::dedup::url_key(&url));

    let mut source_tags: Vec<String> = Vec::new();
    for tag in raw.tags {
        let t = tag.trim().to_lowercase();
        if !t.is_empty() && !source_tags.contains(&t) {
            source_tags.push(t);
        }
    }

    Ok(CandidateItem {
        source,
        external_id,
        url,
        raw_title: title,
        raw_body: raw
            .body
            .as_deref()
            .map(|b| normalize_text(b, 0))
            .unwrap_or_default(),
        published_at,
        engagement_count: raw.engagement.unwrap_or(0),
        comment_count: raw.comments.unwrap_or(0),
        source_tags,
    })
}

/// Normalize a whole provider batch. Bad records are returned alongside the survivors,
/// paired with their url (if any) so the run report can name them.
pub fn normalize_batch(
    source: Source,
    raw: Vec<RawRecord>,
) -> (Vec<CandidateItem>, Vec<(Option<String>, NormalizeError)>) {
    let mut kept = Vec::with_capacity(raw.len());
    let mut rejected = Vec::new();
    for record in raw {
        let url = record.url.clone();
        match normalize_record(source, record) {
            Ok(item) => kept.push(item),
            Err(e) => {
                tracing::warn!(target: "pipeline", %source, url = ?url, error = %e, "malformed record skipped");
                rejected.push((url, e));
            }
        }
    }
    (kept, rejected)
}
