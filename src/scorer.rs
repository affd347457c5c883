//! Priority scoring for summarized items.
//!
//! `score = max(1, floor(engagement × time_decay × source_weight × comment_multiplier))`
//!
//! Monotone: more engagement never lowers the score, more age never raises it.

use crate::ingest::types::CandidateItem;
use crate::source_weights::SourceWeightsConfig;
use crate::summarize::SummaryResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecaySettings {
    /// Full boost up to this age.
    pub plateau_days: f64,
    /// e-folding time after the plateau.
    pub decay_days: f64,
    /// Zero beyond this age.
    pub max_age_days: f64,
}

impl Default for DecaySettings {
    fn default() -> Self {
        Self {
            plateau_days: 2.0,
            decay_days: 4.0,
            max_age_days: 14.0,
        }
    }
}

const PLATEAU_BOOST: f64 = 2.0;

/// Age factor. Future timestamps count as age 0.
pub fn time_decay(age_days: f64, s: &DecaySettings) -> f64 {
    let age = age_days.max(0.0);
    if age <= s.plateau_days {
        PLATEAU_BOOST
    } else if age <= s.max_age_days {
        PLATEAU_BOOST * (-(age - s.plateau_days) / s.decay_days).exp()
    } else {
        0.0
    }
}

pub fn comment_multiplier(comments: u64) -> f64 {
    match comments {
        0 => 1.0,
        1..=4 => 1.1,
        5..=9 => 1.2,
        10..=19 => 1.3,
        20..=49 => 1.4,
        _ => 1.5,
    }
}

/// An item that passed summarization, ready for persistence.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredItem {
    pub item: CandidateItem,
    pub summary: SummaryResult,
    pub score: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: SourceWeightsConfig,
    decay: DecaySettings,
}

impl Scorer {
    pub fn new(weights: SourceWeightsConfig, decay: DecaySettings) -> Self {
        Self { weights, decay }
    }

    pub fn raw_score(&self, item: &CandidateItem, now: DateTime<Utc>) -> i64 {
        let age_days = (now - item.published_at).num_seconds() as f64 / 86_400.0;
        let value = item.engagement_count as f64
            * time_decay(age_days, &self.decay)
            * self.weights.weight_for(item.source)
            * comment_multiplier(item.comment_count);
        (value.floor() as i64).max(1)
    }

    pub fn score(&self, item: CandidateItem, summary: SummaryResult, now: DateTime<Utc>) -> ScoredItem {
        let score = self.raw_score(&item, now);
        ScoredItem {
            item,
            summary,
            score,
        }
    }
}

/// Rescale a batch of scores onto 0–1000 (min → 0, max → 1000). A flat batch maps to 500.
pub fn normalize_scores(scores: &[i64]) -> Vec<i64> {
    let (Some(&min), Some(&max)) = (scores.iter().min(), scores.iter().max()) else {
        return Vec::new();
    };
    if min == max {
        return vec![500; scores.len()];
    }
    let range = (max - min) as f64;
    scores
        .iter()
        .map(|&s| (((s - min) as f64 / range) * 1000.0).round() as i64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Source;
    use chrono::Duration;

    fn item(source: Source, engagement: u64, comments: u64, age_hours: i64, now: DateTime<Utc>) -> CandidateItem {
        CandidateItem {
            source,
            external_id: "1".into(),
            url: "https://example.com/a".into(),
            raw_title: "t".into(),
            raw_body: String::new(),
            published_at: now - Duration::hours(age_hours),
            engagement_count: engagement,
            comment_count: comments,
            source_tags: vec![],
        }
    }

    #[test]
    fn decay_curve() {
        let s = DecaySettings::default();
        assert_eq!(time_decay(-3.0, &s), 2.0);
        assert_eq!(time_decay(1.0, &s), 2.0);
        assert_eq!(time_decay(2.0, &s), 2.0);
        assert!((time_decay(6.0, &s) - 2.0 * (-1.0f64).exp()).abs() < 1e-9);
        assert_eq!(time_decay(14.5, &s), 0.0);
    }

    #[test]
    fn comment_steps() {
        assert_eq!(comment_multiplier(0), 1.0);
        assert_eq!(comment_multiplier(4), 1.1);
        assert_eq!(comment_multiplier(9), 1.2);
        assert_eq!(comment_multiplier(19), 1.3);
        assert_eq!(comment_multiplier(49), 1.4);
        assert_eq!(comment_multiplier(50), 1.5);
    }

    #[test]
    fn github_outweighs_blog() {
        let now = Utc::now();
        let s = Scorer::default();
        let repo = s.raw_score(&item(Source::Github, 100, 0, 1, now), now);
        let blog = s.raw_score(&item(Source::Devto, 100, 0, 1, now), now);
        assert_eq!(repo, 400);
        assert_eq!(blog, 200);
    }

    #[test]
    fn floor_of_one() {
        let now = Utc::now();
        let s = Scorer::default();
        assert_eq!(s.raw_score(&item(Source::Devto, 0, 0, 1, now), now), 1);
        assert_eq!(s.raw_score(&item(Source::Devto, 500, 0, 24 * 30, now), now), 1);
    }

    #[test]
    fn monotone_in_engagement_and_age() {
        let now = Utc::now();
        let s = Scorer::default();
        let mut prev = 0;
        for e in [0, 1, 3, 10, 50, 200, 1000] {
            let v = s.raw_score(&item(Source::Medium, e, 3, 40, now), now);
            assert!(v >= prev);
            prev = v;
        }
        let mut prev = i64::MAX;
        for h in [0, 24, 48, 72, 120, 240, 336, 400] {
            let v = s.raw_score(&item(Source::Medium, 300, 3, h, now), now);
            assert!(v <= prev);
            prev = v;
        }
    }

    #[test]
    fn normalization() {
        assert_eq!(normalize_scores(&[1, 51, 101]), vec![0, 500, 1000]);
        assert_eq!(normalize_scores(&[7, 7]), vec![500, 500]);
        assert!(normalize_scores(&[]).is_empty());
    }
}
