//! Pipeline configuration: `config/pipeline.toml` plus env overrides.
//!
//! Lookup order for the file:
//! 1) `$PIPELINE_CONFIG_PATH` (must exist)
//! 2) `config/pipeline.toml`
//! 3) built-in defaults
//!
//! Env overrides: `LLM_PROVIDER`, `LLM_BATCH_SIZE`, `LLM_CONCURRENCY`, `DATABASE_URL`,
//! `CRAWLER_WEBHOOK_URL`.

pub mod llm;

pub use llm::LlmConfig;

use crate::dedup::DedupConfig;
use crate::error::ConfigError;
use crate::scorer::DecaySettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PATH: &str = "PIPELINE_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/pipeline.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub lookup_chunk_size: usize,
    pub lookup_timeout_secs: u64,
    pub title_similarity_threshold: Option<f64>,
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            lookup_chunk_size: 100,
            lookup_timeout_secs: 10,
            title_similarity_threshold: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSection {
    pub plateau_days: f64,
    pub decay_days: f64,
    pub max_age_days: f64,
    pub source_weights_path: String,
}

impl Default for ScoringSection {
    fn default() -> Self {
        let d = DecaySettings::default();
        Self {
            plateau_days: d.plateau_days,
            decay_days: d.decay_days,
            max_age_days: d.max_age_days,
            source_weights_path: "config/source_weights.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistSection {
    pub write_timeout_secs: u64,
    /// Postgres url; unset means in-memory store.
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for PersistSection {
    fn default() -> Self {
        Self {
            write_timeout_secs: 10,
            database_url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    pub run_timeout_secs: u64,
    /// 0 disables the scheduler.
    pub schedule_interval_secs: u64,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            run_timeout_secs: 900,
            schedule_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub webhook_url: Option<String>,
    /// HMAC key for the `signature` field. Without it no webhook is sent.
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            max_retries: 3,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub dedup: DedupSection,
    pub scoring: ScoringSection,
    pub persist: PersistSection,
    pub run: RunSection,
    pub notify: NotifySection,
}

impl PipelineConfig {
    /// Parse a TOML file. Env overrides are not applied here.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// File lookup + env overrides + validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var(ENV_PATH) {
            Ok(p) if !p.trim().is_empty() => Self::load_from(&PathBuf::from(p))?,
            _ => {
                let default = PathBuf::from(DEFAULT_PATH);
                if default.exists() {
                    Self::load_from(&default)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(p) = env_nonempty("LLM_PROVIDER") {
            self.llm.provider = p;
        }
        if let Some(v) = env_nonempty("LLM_BATCH_SIZE") {
            self.llm.batch_size = v
                .parse()
                .map_err(|_| ConfigError::invalid("LLM_BATCH_SIZE", format!("not a number: {v}")))?;
        }
        if let Some(v) = env_nonempty("LLM_CONCURRENCY") {
            self.llm.concurrency = v
                .parse()
                .map_err(|_| ConfigError::invalid("LLM_CONCURRENCY", format!("not a number: {v}")))?;
        }
        if let Some(url) = env_nonempty("DATABASE_URL") {
            self.persist.database_url = Some(url);
        }
        if let Some(url) = env_nonempty("CRAWLER_WEBHOOK_URL") {
            self.notify.webhook_url = Some(url);
        }
        if let Some(secret) = env_nonempty("CRAWLER_WEBHOOK_SECRET") {
            self.notify.webhook_secret = Some(secret);
        }
        Ok(())
    }

    /// Structural checks. Credentials are checked when the LLM client is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm.validate()?;

        if self.dedup.lookup_chunk_size == 0 {
            return Err(ConfigError::invalid("dedup.lookup_chunk_size", "must be > 0"));
        }
        if self.dedup.lookup_timeout_secs == 0 {
            return Err(ConfigError::invalid("dedup.lookup_timeout_secs", "must be > 0"));
        }
        if let Some(t) = self.dedup.title_similarity_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(ConfigError::invalid(
                    "dedup.title_similarity_threshold",
                    format!("{t} not in 0..=1"),
                ));
            }
        }

        let s = &self.scoring;
        if !(s.plateau_days >= 0.0 && s.plateau_days < s.max_age_days) {
            return Err(ConfigError::invalid(
                "scoring.plateau_days",
                format!("need 0 <= plateau ({}) < max_age ({})", s.plateau_days, s.max_age_days),
            ));
        }
        if s.decay_days <= 0.0 {
            return Err(ConfigError::invalid("scoring.decay_days", "must be > 0"));
        }

        if self.persist.write_timeout_secs == 0 {
            return Err(ConfigError::invalid("persist.write_timeout_secs", "must be > 0"));
        }
        if self.run.run_timeout_secs == 0 {
            return Err(ConfigError::invalid("run.run_timeout_secs", "must be > 0"));
        }
        if self.notify.timeout_secs == 0 {
            return Err(ConfigError::invalid("notify.timeout_secs", "must be > 0"));
        }
        Ok(())
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            lookup_chunk_size: self.dedup.lookup_chunk_size,
            lookup_timeout: Duration::from_secs(self.dedup.lookup_timeout_secs),
            title_similarity_threshold: self.dedup.title_similarity_threshold,
        }
    }

    pub fn decay_settings(&self) -> DecaySettings {
        DecaySettings {
            plateau_days: self.scoring.plateau_days,
            decay_days: self.scoring.decay_days,
            max_age_days: self.scoring.max_age_days,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.persist.write_timeout_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run.run_timeout_secs)
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            [llm]
            provider = "openai"
            batch_size = 5

            [scoring]
            max_age_days = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.llm.provider, "openai");
        assert_eq!(cfg.llm.batch_size, 5);
        assert_eq!(cfg.llm.max_tags, 5);
        assert_eq!(cfg.scoring.plateau_days, 2.0);
        assert_eq!(cfg.scoring.max_age_days, 30.0);
        assert_eq!(cfg.dedup.lookup_chunk_size, 100);
        cfg.validate().unwrap();
    }

    #[test]
    fn decay_parameters_are_checked() {
        let mut cfg = PipelineConfig::default();
        cfg.scoring.plateau_days = 20.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "scoring.plateau_days", .. })
        ));
        let mut cfg = PipelineConfig::default();
        cfg.scoring.decay_days = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.dedup.lookup_timeout_secs = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = PipelineConfig::default();
        cfg.run.run_timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
