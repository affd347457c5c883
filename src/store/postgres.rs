//! Postgres-backed store (`articles` + `article_tags`).
//!
//! Expects unique indexes on `articles.url_key`, `articles.content_hash` and
//! `articles(source, external_id)`. Schema migrations live outside this crate.

use super::{ArticleStore, PersistedRecord, RecordKey, UpsertOutcome};
use crate::error::StoreError;
use crate::ingest::types::ItemType;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

const EXISTING_SQL: &str = r#"
SELECT url_key, content_hash, source, external_id
FROM articles
WHERE url_key = ANY($1)
   OR content_hash = ANY($2)
   OR (source, external_id) IN (SELECT * FROM UNNEST($3::text[], $4::text[]))
"#;

const INSERT_SQL: &str = r#"
INSERT INTO articles (
    item_type, source, external_id, category,
    summary_ko_title, summary_ko_body, title_en, url, url_key, content_hash,
    score, stars, upvotes, comments,
    created_at_source, created_at, updated_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW(), NOW())
ON CONFLICT DO NOTHING
RETURNING id
"#;

const INSERT_TAGS_SQL: &str =
    "INSERT INTO article_tags (article_id, tag) SELECT $1, UNNEST($2::text[])";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

type ExistingRow = (String, String, String, String);

/// Map matched rows back onto the requested keys.
fn align(keys: &[RecordKey], rows: &[ExistingRow]) -> Vec<bool> {
    let url_keys: HashSet<&str> = rows.iter().map(|r| r.0.as_str()).collect();
    let hashes: HashSet<&str> = rows.iter().map(|r| r.1.as_str()).collect();
    let ext: HashSet<(&str, &str)> = rows.iter().map(|r| (r.2.as_str(), r.3.as_str())).collect();
    keys.iter()
        .map(|k| {
            url_keys.contains(k.url_key.as_str())
                || hashes.contains(k.content_hash.as_str())
                || ext.contains(&(k.source.as_str(), k.external_id.as_str()))
        })
        .collect()
}

#[async_trait::async_trait]
impl ArticleStore for PgStore {
    async fn existing(&self, keys: &[RecordKey]) -> Result<Vec<bool>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let url_keys: Vec<String> = keys.iter().map(|k| k.url_key.clone()).collect();
        let hashes: Vec<String> = keys.iter().map(|k| k.content_hash.clone()).collect();
        let sources: Vec<String> = keys.iter().map(|k| k.source.as_str().to_string()).collect();
        let ext_ids: Vec<String> = keys.iter().map(|k| k.external_id.clone()).collect();

        let rows: Vec<ExistingRow> = sqlx::query_as(EXISTING_SQL)
            .bind(&url_keys)
            .bind(&hashes)
            .bind(&sources)
            .bind(&ext_ids)
            .fetch_all(&self.pool)
            .await?;
        debug!(target: "persist", keys = keys.len(), matched = rows.len(), "existing lookup");
        Ok(align(keys, &rows))
    }

    async fn upsert(&self, record: &PersistedRecord) -> Result<UpsertOutcome, StoreError> {
        let (stars, upvotes) = match record.item_type {
            ItemType::Repo => (Some(record.engagement_count), None),
            _ => (None, Some(record.engagement_count)),
        };

        let mut tx = self.pool.begin().await?;
        let id: Option<i64> = sqlx::query_scalar(INSERT_SQL)
            .bind(record.item_type.as_str())
            .bind(record.source.as_str())
            .bind(&record.external_id)
            .bind(record.category.as_str())
            .bind(&record.title_ko)
            .bind(&record.summary_ko)
            .bind(&record.title_en)
            .bind(&record.url)
            .bind(&record.url_key)
            .bind(&record.content_hash)
            .bind(record.score)
            .bind(stars)
            .bind(upvotes)
            .bind(record.comment_count)
            .bind(record.published_at.naive_utc())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(id) = id else {
            tx.rollback().await?;
            return Ok(UpsertOutcome::AlreadyExists);
        };

        if !record.tags.is_empty() {
            sqlx::query(INSERT_TAGS_SQL)
                .bind(id)
                .bind(&record.tags)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(UpsertOutcome::Inserted)
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}
