//! Hybrid scoring: weighted combination of semantic, temporal,
//! contextual and keyword signals, with query-type-dependent weights
//! and a human-readable reasoning string.

use chrono::Utc;

use sage_domain::config::RetrievalConfig;
use sage_domain::memory::{MemoryRole, StoredMemory};
use sage_domain::query::{QueryContext, QueryType, RetrievalResult};

use crate::temporal::TemporalScorer;

/// Per-signal weights; each profile sums to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct WeightProfile {
    pub semantic: f64,
    pub temporal: f64,
    pub context: f64,
    pub keyword: f64,
}

/// The weight profile for a query type. Creative queries fall back
/// to the conceptual profile.
pub fn weights_for(query_type: QueryType) -> WeightProfile {
    match query_type {
        QueryType::Technical => WeightProfile {
            semantic: 0.5,
            temporal: 0.2,
            context: 0.2,
            keyword: 0.1,
        },
        QueryType::Diagnostic => WeightProfile {
            semantic: 0.4,
            temporal: 0.3,
            context: 0.2,
            keyword: 0.1,
        },
        QueryType::Conversational => WeightProfile {
            semantic: 0.3,
            temporal: 0.4,
            context: 0.3,
            keyword: 0.0,
        },
        QueryType::Procedural => WeightProfile {
            semantic: 0.5,
            temporal: 0.2,
            context: 0.2,
            keyword: 0.1,
        },
        QueryType::Conceptual | QueryType::Creative => WeightProfile {
            semantic: 0.6,
            temporal: 0.1,
            context: 0.2,
            keyword: 0.1,
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scorer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct HybridScorer {
    temporal: TemporalScorer,
}

impl HybridScorer {
    pub fn new(cfg: &RetrievalConfig) -> Self {
        Self {
            temporal: TemporalScorer::new(cfg),
        }
    }

    /// Score one stored candidate against the analysed query.
    pub fn score(&self, memory: &StoredMemory, query: &QueryContext) -> RetrievalResult {
        let semantic = memory.similarity;
        let temporal = self
            .temporal
            .score(memory.created_at, Utc::now(), Some(query));
        let context = self.context_score(memory, query);
        let keyword = keyword_score(&memory.content, query);

        let w = weights_for(query.query_type);
        let final_score =
            semantic * w.semantic + temporal * w.temporal + context * w.context + keyword * w.keyword;

        RetrievalResult {
            content: memory.content.clone(),
            role: memory.role.as_str().to_owned(),
            similarity_score: semantic,
            temporal_score: temporal,
            context_score: context,
            final_score,
            metadata: memory.metadata.clone(),
            reasoning: reasoning(semantic, temporal, context, keyword),
        }
    }

    /// Session continuity (40%), role consistency, and
    /// technical-domain overlap (30%), capped at 1.0.
    fn context_score(&self, memory: &StoredMemory, query: &QueryContext) -> f64 {
        let mut score = 0.0;

        if !query.session_history.is_empty() {
            let keywords = metadata_keywords(&memory.metadata);
            let relevance =
                self.temporal
                    .session_relevance(&memory.session_id, &keywords, &query.session_history);
            score += relevance * 0.4;
        }

        // Conversational continuations want the assistant's answers;
        // everything else favours similar questions.
        match (query.query_type, memory.role) {
            (QueryType::Conversational, MemoryRole::Assistant) => score += 0.3,
            (QueryType::Conversational, MemoryRole::User) => {}
            (_, MemoryRole::User) => score += 0.2,
            _ => {}
        }

        if !query.technical_keywords.is_empty() {
            let content_keywords = metadata_keywords(&memory.metadata);
            if !content_keywords.is_empty() {
                let overlap = content_keywords
                    .iter()
                    .filter(|kw| query.technical_keywords.contains(kw))
                    .count();
                score += overlap as f64 / query.technical_keywords.len().max(1) as f64 * 0.3;
            }
        }

        score.min(1.0)
    }
}

/// Fraction of the query's technical keywords appearing verbatim in
/// the candidate content.
fn keyword_score(content: &str, query: &QueryContext) -> f64 {
    if query.technical_keywords.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let matches = query
        .technical_keywords
        .iter()
        .filter(|kw| content_lower.contains(&kw.to_lowercase()))
        .count();
    matches as f64 / query.technical_keywords.len() as f64
}

/// The `keywords` array the save path stashes in row metadata.
fn metadata_keywords(metadata: &serde_json::Value) -> Vec<String> {
    metadata
        .get("keywords")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default()
}

fn reasoning(semantic: f64, temporal: f64, context: f64, keyword: f64) -> String {
    let mut parts: Vec<String> = Vec::new();

    if semantic > 0.7 {
        parts.push(format!("high semantic similarity({semantic:.2})"));
    } else if semantic > 0.5 {
        parts.push(format!("medium semantic similarity({semantic:.2})"));
    }
    if temporal > 0.8 {
        parts.push("time-sensitive".into());
    }
    if context > 0.6 {
        parts.push("context-relevant".into());
    }
    if keyword > 0.5 {
        parts.push("keyword match".into());
    }

    if parts.is_empty() {
        "basic match".into()
    } else {
        parts.join(" + ")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
