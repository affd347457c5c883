use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Deserialize;
use serde_json::Value;

use crate::ingest::types::{RawRecord, Source, SourceProvider};

const API_URL: &str = "https://dev.to/api/articles";

/// One entry of `GET /api/articles`.
#[derive(Debug, Deserialize)]
struct Article {
    id: u64,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    positive_reactions_count: Option<u64>,
    #[serde(default)]
    public_reactions_count: Option<u64>,
    #[serde(default)]
    comments_count: Option<u64>,
    /// Array on list endpoints, comma-separated string on detail endpoints.
    #[serde(default)]
    tag_list: Value,
}

fn tags_of(v: &Value) -> Vec<String> {
    match v {
        Value::Array(items) => items
            .iter()
            .filter_map(|t| t.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

pub struct DevtoProvider {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        client: reqwest::Client,
        top_days: u32,
        per_page: u32,
    },
}

impl DevtoProvider {
    pub fn from_fixture(json: &str) -> Self {
        Self {
            mode: Mode::Fixture(json.to_string()),
        }
    }

    /// Top articles of the last `top_days` days.
    pub fn from_api(client: reqwest::Client, top_days: u32, per_page: u32) -> Self {
        Self {
            mode: Mode::Http {
                client,
                top_days,
                per_page,
            },
        }
    }

    fn parse_items_from_str(s: &str) -> Result<Vec<RawRecord>> {
        let t0 = std::time::Instant::now();
        let articles: Vec<Article> = serde_json::from_str(s).context("parsing dev.to articles json")?;
        let out: Vec<RawRecord> = articles
            .into_iter()
            .map(|a| RawRecord {
                external_id: Some(a.id.to_string()),
                url: a.url,
                title: a.title,
                body: a.description,
                published_at: a.published_at,
                engagement: a.positive_reactions_count.or(a.public_reactions_count),
                comments: a.comments_count,
                tags: tags_of(&a.tag_list),
            })
            .collect();
        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

#[async_trait]
impl SourceProvider for DevtoProvider {
    async fn fetch_candidates(&self) -> Result<Vec<RawRecord>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_items_from_str(s),
            Mode::Http {
                client,
                top_days,
                per_page,
            } => {
                let resp = client
                    .get(API_URL)
                    .query(&[("top", top_days.to_string()), ("per_page", per_page.to_string())])
                    .send()
                    .await
                    .and_then(|r| r.error_for_status());
                let body = match resp {
                    Ok(r) => r.text().await.context("dev.to http .text()")?,
                    Err(e) => {
                        tracing::warn!(error = %e, provider = "devto", "provider http error");
                        counter!("source_provider_errors_total", "source" => "devto").increment(1);
                        return Err(e).context("dev.to http get()");
                    }
                };
                Self::parse_items_from_str(&body)
            }
        }
    }

    fn source(&self) -> Source {
        Source::Devto
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_list_shapes() {
        assert_eq!(tags_of(&json!(["rust", "webdev"])), vec!["rust", "webdev"]);
        assert_eq!(tags_of(&json!("rust, webdev,")), vec!["rust", "webdev"]);
        assert!(tags_of(&Value::Null).is_empty());
    }
}
