//! Trigger selector: which source(s) a crawl request covers.

use crate::error::ConfigError;
use crate::ingest::types::Source;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelector {
    Single(Source),
    /// Dev.to, Hashnode and Medium, one run each.
    AllBlogs,
    /// Model leaderboard sync. Served by a separate job, no article runs.
    LlmRankings,
}

impl SourceSelector {
    /// Sources to run, in invocation order.
    pub fn sources(self) -> Vec<Source> {
        match self {
            SourceSelector::Single(s) => vec![s],
            SourceSelector::AllBlogs => vec![Source::Devto, Source::Hashnode, Source::Medium],
            SourceSelector::LlmRankings => Vec::new(),
        }
    }
}

impl FromStr for SourceSelector {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "devto" => Ok(Self::Single(Source::Devto)),
            "hashnode" => Ok(Self::Single(Source::Hashnode)),
            "medium" => Ok(Self::Single(Source::Medium)),
            "github" => Ok(Self::Single(Source::Github)),
            "reddit" => Ok(Self::Single(Source::Reddit)),
            "all_blogs" => Ok(Self::AllBlogs),
            "llm_rankings" => Ok(Self::LlmRankings),
            _ => Err(ConfigError::UnknownSelector(s.to_string())),
        }
    }
}

impl fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelector::Single(s) => f.write_str(s.as_str()),
            SourceSelector::AllBlogs => f.write_str("all_blogs"),
            SourceSelector::LlmRankings => f.write_str("llm_rankings"),
        }
    }
}
