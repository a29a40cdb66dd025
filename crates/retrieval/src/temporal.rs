//! Time-decay scoring.
//!
//! Exponential decay with a recency boost, an in-session bonus,
//! tunable floors, and an urgency modulation for queries that prefer
//! the freshest material.

use chrono::{DateTime, Utc};

use sage_domain::config::RetrievalConfig;
use sage_domain::query::{QueryContext, SessionHistoryEntry};

pub struct TemporalScorer {
    decay_base: f64,
    session_floor: f64,
    recency_floor: f64,
}

impl TemporalScorer {
    pub fn new(cfg: &RetrievalConfig) -> Self {
        Self {
            decay_base: cfg.time_decay_base,
            session_floor: cfg.session_floor,
            recency_floor: cfg.recency_floor,
        }
    }

    /// Score a memory by its age, in [0, 1].
    pub fn score(&self, created_at: DateTime<Utc>, now: DateTime<Utc>, query: Option<&QueryContext>) -> f64 {
        let age_hours = (now - created_at).num_seconds().max(0) as f64 / 3600.0;
        self.score_age_hours(age_hours, query.map(|q| q.urgency_level).unwrap_or(1))
    }

    pub fn score_age_hours(&self, age_hours: f64, urgency: u8) -> f64 {
        // Base exponential decay, half-life about 13 days.
        let mut score = self.decay_base.powf(age_hours / 24.0);

        if age_hours <= 24.0 {
            score *= 2.0;
        }
        if age_hours <= 1.0 {
            score *= 1.5;
        }

        // Floors keep same-session and same-day content clearly apart
        // from older material.
        let floor = if age_hours <= 1.0 {
            self.session_floor
        } else if age_hours <= 24.0 {
            self.recency_floor
        } else {
            0.0
        };
        score = score.max(floor);

        if urgency >= 4 {
            score *= 1.0 + f64::from(5 - urgency.min(5)) * 0.2;
        }

        score.clamp(0.0, 1.0)
    }

    /// Session relevance against the recent history: a fixed bonus
    /// per matching session plus a small bonus per keyword overlap,
    /// capped at 1.0.
    pub fn session_relevance(
        &self,
        candidate_session: &str,
        candidate_keywords: &[String],
        history: &[SessionHistoryEntry],
    ) -> f64 {
        if history.is_empty() {
            return 0.0;
        }

        let mut score = 0.0;
        for entry in history {
            if entry.session_id == candidate_session {
                score += 0.3;
            }
        }
        for entry in history {
            let overlap = entry
                .keywords
                .iter()
                .filter(|kw| candidate_keywords.contains(kw))
                .count();
            score += overlap as f64 * 0.1;
        }

        score.min(1.0)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn scorer() -> TemporalScorer {
        TemporalScorer::new(&RetrievalConfig::default())
    }

    #[test]
    fn fresh_content_hits_the_session_floor() {
        let s = scorer().score_age_hours(0.5, 1);
        assert!(s >= 0.9);
        assert!(s <= 1.0);
    }

    #[test]
    fn same_day_content_stays_above_recency_floor() {
        let s = scorer().score_age_hours(12.0, 1);
        assert!(s >= 0.7);
    }

    #[test]
    fn old_content_decays_below_the_floors() {
        let week = scorer().score_age_hours(24.0 * 7.0, 1);
        let month = scorer().score_age_hours(24.0 * 30.0, 1);
        assert!(week < 0.7);
        assert!(month < week);
        assert!(month > 0.0);
    }

    #[test]
    fn decay_is_monotonic_past_the_boosts() {
        let mut last = f64::INFINITY;
        for age in [25.0, 48.0, 100.0, 500.0, 2000.0] {
            let s = scorer().score_age_hours(age, 1);
            assert!(s < last);
            last = s;
        }
    }

    #[test]
    fn urgency_four_boosts_recent_material() {
        let base = scorer().score_age_hours(30.0, 1);
        let urgent = scorer().score_age_hours(30.0, 4);
        assert!(urgent > base);
        // Urgency five applies no extra multiplier.
        let critical = scorer().score_age_hours(30.0, 5);
        assert!((critical - base).abs() < 1e-12);
    }

    #[test]
    fn score_never_leaves_unit_interval() {
        for age in [0.0, 0.5, 1.0, 23.9, 24.1, 1000.0] {
            for urgency in 1..=5 {
                let s = scorer().score_age_hours(age, urgency);
                assert!((0.0..=1.0).contains(&s), "age={age} urgency={urgency} s={s}");
            }
        }
    }

    #[test]
    fn session_relevance_caps_at_one() {
        let history: Vec<SessionHistoryEntry> = (0..10)
            .map(|i| SessionHistoryEntry {
                session_id: "s1".into(),
                turn_index: i,
                prompt_preview: String::new(),
                keywords: vec!["database".into()],
                timestamp: Utc::now(),
            })
            .collect();

        let score = scorer().session_relevance("s1", &["database".into()], &history);
        assert_eq!(score, 1.0);

        let none = scorer().session_relevance("other", &[], &[]);
        assert_eq!(none, 0.0);
    }

    #[test]
    fn keyword_overlap_adds_tenths() {
        let history = vec![SessionHistoryEntry {
            session_id: "s1".into(),
            turn_index: 0,
            prompt_preview: String::new(),
            keywords: vec!["index".into(), "btree".into()],
            timestamp: Utc::now(),
        }];
        // Different session, one keyword overlap.
        let score = scorer().session_relevance("s2", &["index".into()], &history);
        assert!((score - 0.1).abs() < 1e-12);
    }
}
