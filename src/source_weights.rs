//! # Source Weights
//!
//! Per-source multiplier applied by the scorer. GitHub repositories carry more signal per
//! star than blog reactions, so they weigh more.
//!
//! - Loads from JSON config (`default_weight` + `weights` keyed by source name).
//! - Case-insensitive keys; unknown keys are ignored with a warning.
//! - Missing or invalid file → built-in `default_seed()`.

use crate::ingest::types::Source;
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeightsConfig {
    /// Weight for any source without an explicit entry.
    #[serde(default = "default_default_weight")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

fn default_default_weight() -> f64 {
    1.0
}

impl Default for SourceWeightsConfig {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl SourceWeightsConfig {
    /// Load configuration from a JSON file. Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let cfg = match fs::read_to_string(path) {
            Ok(s) => match serde_json::from_str::<Self>(&s) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid source weights, using defaults");
                    return Self::default_seed();
                }
            },
            Err(_) => return Self::default_seed(),
        };
        for key in cfg.weights.keys() {
            if key.parse::<Source>().is_err() {
                warn!(key = %key, "source weight for unknown source ignored");
            }
        }
        cfg
    }

    /// Weight for `source`, never negative.
    pub fn weight_for(&self, source: Source) -> f64 {
        self.weights
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(source.as_str()))
            .map(|(_, &w)| w)
            .unwrap_or(self.default_weight)
            .max(0.0)
    }

    /// github 2.0; every blog and community source 1.0.
    pub fn default_seed() -> Self {
        let mut weights = HashMap::new();
        for source in Source::ALL {
            let w = match source {
                Source::Github => 2.0,
                _ => 1.0,
            };
            weights.insert(source.as_str().to_string(), w);
        }
        Self {
            default_weight: 1.0,
            weights,
        }
    }
}
