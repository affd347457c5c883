// src/config/llm.rs
use crate::error::ConfigError;
use crate::summarize::providers::{build_transport, ProviderKind, TransportSettings};
use crate::summarize::{LlmClient, LlmSettings};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::info;

pub const MAX_BATCH_SIZE: usize = 25;

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "gemini" | "openai" | "anthropic" (case-insensitive)
    pub provider: String,
    /// Provider default when absent.
    pub model: Option<String>,
    /// "ENV" means: read from GEMINI_API_KEY / OPENAI_API_KEY / ANTHROPIC_API_KEY (by provider)
    pub api_key: String,
    pub batch_size: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tags: usize,
    /// Alternate API endpoint (proxies, local gateways).
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: None,
            api_key: "ENV".into(),
            batch_size: 2,
            concurrency: 2,
            timeout_secs: 120,
            max_tokens: 8000,
            temperature: 0.3,
            max_tags: 5,
            base_url: None,
        }
    }
}

impl LlmConfig {
    pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
        self.provider.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.provider_kind()?;
        if !(1..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(ConfigError::invalid(
                "llm.batch_size",
                format!("{} not in 1..={MAX_BATCH_SIZE}", self.batch_size),
            ));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("llm.concurrency", "must be > 0"));
        }
        if self.max_tags == 0 {
            return Err(ConfigError::invalid("llm.max_tags", "must be > 0"));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::invalid("llm.timeout_secs", "must be > 0"));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("llm.max_tokens", "must be > 0"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::invalid(
                "llm.temperature",
                format!("{} not in 0..=2", self.temperature),
            ));
        }
        Ok(())
    }

    /// Resolve the api key; `"ENV"` or empty reads the provider's env var.
    pub fn resolve_api_key(&self, kind: ProviderKind) -> Result<String, ConfigError> {
        let configured = self.api_key.trim();
        let key = if configured.is_empty() || configured.eq_ignore_ascii_case("env") {
            env::var(kind.api_key_env()).unwrap_or_default()
        } else {
            configured.to_string()
        };
        if key.trim().is_empty() {
            return Err(ConfigError::MissingCredential {
                provider: kind.as_str(),
                env_var: kind.api_key_env(),
            });
        }
        Ok(key.trim().to_string())
    }

    pub fn settings(&self) -> Result<LlmSettings, ConfigError> {
        Ok(LlmSettings {
            provider: self.provider_kind()?,
            batch_size: self.batch_size,
            concurrency: self.concurrency,
            timeout: Duration::from_secs(self.timeout_secs),
            max_tags: self.max_tags,
        })
    }

    /// Build the shared client. Every failure here happens before any network call.
    pub fn build_client(&self) -> Result<LlmClient, ConfigError> {
        self.validate()?;
        let kind = self.provider_kind()?;
        let api_key = self.resolve_api_key(kind)?;
        let model = self
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| kind.default_model().to_string());
        info!(
            provider = %kind,
            model = %model,
            key_len = api_key.len(),
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "LLM client configured"
        );
        let transport = build_transport(
            kind,
            TransportSettings {
                model,
                api_key,
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                base_url: self.base_url.clone(),
            },
        )?;
        Ok(LlmClient::new(transport, self.settings()?))
    }
}
