//! Error taxonomy for the ingest pipeline.
//!
//! Only [`ConfigError`] is allowed to abort a run. The other kinds are absorbed by the stage
//! that sees them and turned into "drop this item/batch" decisions.

use std::time::Duration;

/// Startup/configuration failures. A run refuses to start when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unsupported LLM provider: {0:?} (expected gemini, openai or anthropic)")]
    UnsupportedProvider(String),

    #[error("missing credential for provider {provider}: set {env_var}")]
    MissingCredential {
        provider: &'static str,
        env_var: &'static str,
    },

    #[error("unknown source selector: {0:?}")]
    UnknownSelector(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("reading config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// A raw record the normalizer could not turn into a candidate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing url")]
    MissingUrl,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("missing title")]
    MissingTitle,
    #[error("missing published_at")]
    MissingPublishedAt,
}

/// Failure of one LLM request (one batch).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider http error ({status}): {body}")]
    Http { status: u16, body: String },

    #[error("provider quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider returned no content")]
    EmptyResponse,

    #[error("provider request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider response unusable: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Classify an HTTP failure; 429s and bodies mentioning an exceeded quota trip the breaker.
    pub fn from_status(status: u16, body: String) -> Self {
        let lower = body.to_ascii_lowercase();
        if status == 429 || (lower.contains("quota") && lower.contains("exceed")) {
            Self::QuotaExceeded(body)
        } else {
            Self::Http { status, body }
        }
    }
}

/// Failure of the persisted-record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}
