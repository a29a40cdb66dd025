//! Ephemeral retrieval types: the analysed query and the ranked
//! candidates the engine returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Technical,
    Conceptual,
    Procedural,
    Diagnostic,
    Creative,
    Conversational,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Technical => "technical",
            QueryType::Conceptual => "conceptual",
            QueryType::Procedural => "procedural",
            QueryType::Diagnostic => "diagnostic",
            QueryType::Creative => "creative",
            QueryType::Conversational => "conversational",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    SemanticFirst,
    TemporalWeighted,
    ContextAware,
    HybridAdvanced,
    Adaptive,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::SemanticFirst => "semantic_first",
            RetrievalStrategy::TemporalWeighted => "temporal_weighted",
            RetrievalStrategy::ContextAware => "context_aware",
            RetrievalStrategy::HybridAdvanced => "hybrid_advanced",
            RetrievalStrategy::Adaptive => "adaptive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalTone {
    Urgent,
    Confused,
    Frustrated,
    Curious,
    Neutral,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A recently saved turn, kept by the service for context awareness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHistoryEntry {
    pub session_id: String,
    pub turn_index: i32,
    pub prompt_preview: String,
    pub keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Everything the analyser learned about one query. Built per query,
/// discarded after retrieval.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub query: String,
    pub query_type: QueryType,
    pub technical_keywords: Vec<String>,
    pub user_intent: Option<String>,
    pub emotional_tone: EmotionalTone,
    /// 1 (relaxed) .. 5 (critical).
    pub urgency_level: u8,
    pub session_history: Vec<SessionHistoryEntry>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retrieval results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One ranked retrieval candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub content: String,
    pub role: String,
    pub similarity_score: f64,
    pub temporal_score: f64,
    pub context_score: f64,
    pub final_score: f64,
    #[serde(default)]
    pub metadata: Value,
    pub reasoning: String,
}

impl RetrievalResult {
    /// Stable content hash, the last tie-break in result ordering.
    pub fn content_hash(&self) -> u64 {
        let digest = Sha256::digest(self.content.as_bytes());
        u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
    }
}

/// Ordering: final score desc, then temporal score desc, then stable
/// content hash so equal-scored lists are deterministic.
pub fn sort_results(results: &mut [RetrievalResult]) {
    results.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then(b.temporal_score.total_cmp(&a.temporal_score))
            .then_with(|| a.content_hash().cmp(&b.content_hash()))
    });
}
