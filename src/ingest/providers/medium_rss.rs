use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::ingest::types::{RawRecord, Source, SourceProvider};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    /// `<content:encoded>`; the deserializer matches on the local name.
    #[serde(rename = "encoded")]
    content: Option<String>,
    #[serde(rename = "category", default)]
    categories: Vec<String>,
}
#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let dt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

/// Medium post id from `https://medium.com/p/<id>` guids.
fn post_id(guid: &str) -> Option<String> {
    let id = guid.trim().rsplit('/').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Strip Medium's `?source=rss-...` tracking suffix.
fn clean_link(link: &str) -> String {
    link.trim().split('?').next().unwrap_or_default().to_string()
}

pub struct MediumRssProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        feeds: Vec<String>,
        client: reqwest::Client,
    },
}

impl MediumRssProvider {
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    /// One feed url per tag, e.g. `https://medium.com/feed/tag/programming`.
    pub fn from_tags(tags: &[&str], client: reqwest::Client) -> Self {
        let feeds = tags
            .iter()
            .map(|t| format!("https://medium.com/feed/tag/{t}"))
            .collect();
        Self {
            mode: Mode::Http { feeds, client },
        }
    }

    fn parse_items_from_str(s: &str) -> Result<Vec<RawRecord>> {
        let t0 = std::time::Instant::now();
        let rss: Rss = from_str(s).context("parsing medium rss xml")?;

        let mut out = Vec::with_capacity(rss.channel.item.len());
        for it in rss.channel.item {
            let body = it
                .content
                .filter(|c| !c.trim().is_empty())
                .or(it.description)
                .map(|b| crate::ingest::normalize_text(&b, 0));
            out.push(RawRecord {
                external_id: it.guid.as_ref().and_then(|g| post_id(&g.value)),
                url: it.link.as_deref().map(clean_link),
                title: it.title,
                body,
                published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                // The feed carries no clap or response counts.
                engagement: None,
                comments: None,
                tags: it.categories,
            });
        }

        let ms = t0.elapsed().as_secs_f64() * 1_000.0;
        histogram!("ingest_parse_ms").record(ms);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for MediumRssProvider {
    async fn fetch_candidates(&self) -> Result<Vec<RawRecord>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s),
            Mode::Http { feeds, client } => {
                let mut out = Vec::new();
                let mut failures = 0usize;
                for feed in feeds {
                    let body = match client.get(feed).send().await.and_then(|r| r.error_for_status()) {
                        Ok(resp) => resp.text().await.context("medium http .text()")?,
                        Err(e) => {
                            tracing::warn!(error = %e, feed = %feed, provider = "medium", "feed fetch failed");
                            counter!("source_provider_errors_total", "source" => "medium").increment(1);
                            failures += 1;
                            continue;
                        }
                    };
                    match Self::parse_items_from_str(&body) {
                        Ok(mut items) => out.append(&mut items),
                        Err(e) => {
                            tracing::warn!(error = ?e, feed = %feed, "feed parse failed");
                            counter!("source_provider_errors_total", "source" => "medium").increment(1);
                            failures += 1;
                        }
                    }
                }
                if failures > 0 && failures == feeds.len() {
                    bail!("all {failures} medium feeds failed");
                }
                Ok(out)
            }
        }
    }

    fn source(&self) -> Source {
        Source::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc2822_dates() {
        let dt = parse_rfc2822("Tue, 14 Oct 2025 09:30:00 GMT").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-14T09:30:00+00:00");
        assert!(parse_rfc2822("yesterday").is_none());
    }

    #[test]
    fn link_and_id_cleanup() {
        assert_eq!(
            clean_link("https://medium.com/@a/post-1a2b?source=rss----tag_programming"),
            "https://medium.com/@a/post-1a2b"
        );
        assert_eq!(post_id("https://medium.com/p/1a2b3c").as_deref(), Some("1a2b3c"));
    }
}
