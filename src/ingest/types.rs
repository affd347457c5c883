// src/ingest/types.rs
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content source an item was collected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Devto,
    Hashnode,
    Medium,
    Github,
    Reddit,
    Hackernews,
}

impl Source {
    pub const ALL: [Source; 6] = [
        Source::Devto,
        Source::Hashnode,
        Source::Medium,
        Source::Github,
        Source::Reddit,
        Source::Hackernews,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Source::Devto => "devto",
            Source::Hashnode => "hashnode",
            Source::Medium => "medium",
            Source::Github => "github",
            Source::Reddit => "reddit",
            Source::Hackernews => "hackernews",
        }
    }

    pub fn item_type(self) -> ItemType {
        match self {
            Source::Github => ItemType::Repo,
            Source::Reddit | Source::Hackernews => ItemType::Discussion,
            Source::Devto | Source::Hashnode | Source::Medium => ItemType::Blog,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Source::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown source: {s}"))
    }
}

/// Kind of item stored downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemType {
    Repo,
    Blog,
    Discussion,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Repo => "REPO",
            ItemType::Blog => "BLOG",
            ItemType::Discussion => "DISCUSSION",
        }
    }
}

/// Source-specific record as handed over by a provider. Everything is optional here;
/// the normalizer decides what is mandatory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRecord {
    pub external_id: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    /// Stars for repositories, reactions/upvotes for posts.
    pub engagement: Option<u64>,
    pub comments: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Canonical candidate produced by the normalizer. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateItem {
    pub source: Source,
    pub external_id: String,
    pub url: String,
    pub raw_title: String,
    pub raw_body: String,
    pub published_at: DateTime<Utc>,
    pub engagement_count: u64,
    pub comment_count: u64,
    pub source_tags: Vec<String>,
}

/// One variant per site; each fetches raw records for exactly one [`Source`].
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<RawRecord>>;
    fn source(&self) -> Source;
}
