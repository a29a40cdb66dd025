//! The retrieval pipeline.

use std::time::Duration;

use sage_domain::config::RetrievalConfig;
use sage_domain::error::Result;
use sage_domain::query::{
    sort_results, QueryType, RetrievalResult, RetrievalStrategy, SessionHistoryEntry,
};
use sage_providers::reranker::{fusion_weight, RerankMode};
use sage_providers::{EmbeddingClient, RerankerClient};
use sage_storage::MemoryStore;

use crate::analyzer::SemanticAnalyzer;
use crate::cache::QueryCache;
use crate::scoring::HybridScorer;

/// Per-call options for [`RetrievalEngine::retrieve`].
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub strategy: RetrievalStrategy,
    /// `None` falls back to the configured default.
    pub enable_neural_rerank: Option<bool>,
    pub session_history: Vec<SessionHistoryEntry>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::HybridAdvanced,
            enable_neural_rerank: None,
            session_history: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Owned by one service instance; the cache inside is not shared
/// across processes.
pub struct RetrievalEngine {
    store: MemoryStore,
    embedding: EmbeddingClient,
    reranker: RerankerClient,
    analyzer: SemanticAnalyzer,
    scorer: HybridScorer,
    cache: QueryCache,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: MemoryStore,
        embedding: EmbeddingClient,
        reranker: RerankerClient,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedding,
            reranker,
            analyzer: SemanticAnalyzer::new(),
            scorer: HybridScorer::new(&config),
            cache: QueryCache::new(
                Duration::from_secs(config.cache_ttl_secs),
                config.cache_capacity,
            ),
            config,
        }
    }

    /// Analyse → cache → base retrieval → hybrid rescore → optional
    /// neural rerank → diversity filter → cache.
    pub async fn retrieve(
        &self,
        query: &str,
        max_results: usize,
        opts: RetrieveOptions,
    ) -> Result<Vec<RetrievalResult>> {
        let ctx = self.analyzer.analyze(query, opts.session_history);
        let use_neural = opts
            .enable_neural_rerank
            .unwrap_or(self.config.enable_neural_rerank);

        let cache_key = QueryCache::key(query, opts.strategy, max_results, use_neural);
        if let Some(cached) = self.cache.get(&cache_key) {
            tracing::debug!(query_type = ctx.query_type.as_str(), "retrieval cache hit");
            return Ok(cached);
        }

        // Over-fetch so rescoring and diversity have room to work.
        let base_count = max_results * if use_neural { 3 } else { 2 };
        let query_embedding = self.embedding.embed(query).await?;
        let mut candidates = self
            .store
            .search_vector(&query_embedding, base_count as i64)
            .await?;

        // Material past the age horizon never surfaces.
        let horizon = chrono::Utc::now() - chrono::Duration::days(self.config.max_age_days);
        candidates.retain(|m| m.created_at >= horizon);

        let mut results: Vec<RetrievalResult> = candidates
            .iter()
            .map(|memory| self.scorer.score(memory, &ctx))
            .collect();
        sort_results(&mut results);

        if use_neural && results.len() > 3 {
            self.neural_rerank(query, &mut results, ctx.query_type).await;
        }

        let selected = diversity_filter(results, max_results, self.config.diversity_factor);

        tracing::info!(
            query_type = ctx.query_type.as_str(),
            urgency = ctx.urgency_level,
            returned = selected.len(),
            neural = use_neural,
            "retrieval complete"
        );

        self.cache.insert(cache_key, selected.clone());
        Ok(selected)
    }

    /// Refine scores through the external reranker. A provider outage
    /// leaves the hybrid ordering intact (neutral scores only shift
    /// weights, never drop results).
    async fn neural_rerank(
        &self,
        query: &str,
        results: &mut Vec<RetrievalResult>,
        query_type: QueryType,
    ) {
        let documents: Vec<String> = results
            .iter()
            .map(|r| format!("{}: {}", r.role, r.content))
            .collect();

        let scores = self
            .reranker
            .rerank(query, &documents, RerankMode::Balanced, None)
            .await;

        let weight = fusion_weight(query_type);
        for score in &scores {
            if let Some(result) = results.get_mut(score.original_index) {
                fuse_neural(result, score.relevance_score, weight);
            }
        }
        sort_results(results);
    }

    /// Invalidate cached lists that surfaced this session.
    pub fn invalidate_session(&self, session_id: &str) {
        self.cache.invalidate_session(session_id);
    }

    /// Performance counters for the stats tool.
    pub fn performance_stats(&self) -> serde_json::Value {
        serde_json::json!({
            "cache_size": self.cache.len(),
            "cache_capacity": self.config.cache_capacity,
            "cache_ttl_secs": self.config.cache_ttl_secs,
            "neural_rerank_enabled": self.config.enable_neural_rerank,
            "diversity_factor": self.config.diversity_factor,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fusion and diversity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `final = w · neural + (1 − w) · original`, recorded in the
/// reasoning trail.
fn fuse_neural(result: &mut RetrievalResult, relevance: f64, weight: f64) {
    let fused = weight * relevance + (1.0 - weight) * result.final_score;
    result.final_score = fused;
    result
        .reasoning
        .push_str(&format!(" + neural rerank({relevance:.3})"));
}

/// Greedy selection balancing score against novelty: after seeding
/// with the top result, repeatedly take the candidate maximising
/// `(1 − λ) · final_score + λ · diversity`, where diversity is one
/// minus the mean Jaccard word overlap with what is already chosen.
fn diversity_filter(
    results: Vec<RetrievalResult>,
    max_results: usize,
    lambda: f64,
) -> Vec<RetrievalResult> {
    if results.len() <= max_results {
        return results;
    }

    let mut remaining = results;
    let mut selected: Vec<RetrievalResult> = Vec::with_capacity(max_results);
    selected.push(remaining.remove(0));

    while selected.len() < max_results && !remaining.is_empty() {
        let mut best_index = 0;
        let mut best_combined = f64::NEG_INFINITY;

        for (i, candidate) in remaining.iter().enumerate() {
            let diversity = 1.0 - mean_overlap(candidate, &selected);
            let combined = candidate.final_score * (1.0 - lambda) + diversity * lambda;
            if combined > best_combined {
                best_combined = combined;
                best_index = i;
            }
        }

        selected.push(remaining.remove(best_index));
    }

    selected
}

fn mean_overlap(candidate: &RetrievalResult, selected: &[RetrievalResult]) -> f64 {
    if selected.is_empty() {
        return 0.0;
    }
    let total: f64 = selected
        .iter()
        .map(|s| jaccard(&candidate.content, &s.content))
        .sum();
    total / selected.len() as f64
}

/// Word-level Jaccard overlap, case-insensitive.
fn jaccard(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let wa: HashSet<&str> = a_lower.split_whitespace().collect();
    let wb: HashSet<&str> = b_lower.split_whitespace().collect();
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let intersection = wa.intersection(&wb).count();
    let union = wa.union(&wb).count();
    intersection as f64 / union as f64
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn result(final_score: f64, content: &str) -> RetrievalResult {
        RetrievalResult {
            content: content.into(),
            role: "assistant".into(),
            similarity_score: final_score,
            temporal_score: 0.5,
            context_score: 0.0,
            final_score,
            metadata: serde_json::Value::Null,
            reasoning: "basic match".into(),
        }
    }

    #[test]
    fn jaccard_overlap_behaviour() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert!((jaccard("a b c", "b c d") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard("", "a"), 0.0);
    }

    #[test]
    fn neural_fusion_reorders_candidates() {
        // Ten candidates scored 0.9 down to 0.1 by the hybrid pass;
        // the reranker strongly prefers the second one.
        let mut results: Vec<RetrievalResult> = (0..10)
            .map(|i| result(0.9 - i as f64 * 0.1, &format!("candidate number {i}")))
            .collect();
        let relevance = [0.1, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1];
        let weight = fusion_weight(QueryType::Technical);
        for (i, rel) in relevance.iter().enumerate() {
            fuse_neural(&mut results[i], *rel, weight);
        }
        sort_results(&mut results);

        // 0.6 * 0.9 + 0.4 * 0.8 = 0.86 overtakes 0.6 * 0.1 + 0.4 * 0.9 = 0.42.
        assert_eq!(results[0].content, "candidate number 1");
        assert!((results[0].final_score - 0.86).abs() < 1e-9);
        assert!(results[0].reasoning.contains("neural rerank(0.900)"));
    }

    #[test]
    fn diversity_filter_prefers_novel_content() {
        let results = vec![
            result(0.9, "postgres vacuum tuning guide"),
            result(0.89, "postgres vacuum tuning guide"),
            result(0.5, "rust borrow checker basics"),
        ];
        let selected = diversity_filter(results, 2, 0.7);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].content, "postgres vacuum tuning guide");
        // The near-duplicate loses to the novel candidate.
        assert_eq!(selected[1].content, "rust borrow checker basics");
    }

    #[test]
    fn diversity_filter_short_lists_pass_through() {
        let results = vec![result(0.9, "a"), result(0.8, "b")];
        let selected = diversity_filter(results, 5, 0.7);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn scores_stay_monotonic_after_selection() {
        let results: Vec<RetrievalResult> = (0..8)
            .map(|i| result(0.9 - i as f64 * 0.05, &format!("topic {i} words entirely distinct {i}")))
            .collect();
        let selected = diversity_filter(results, 4, 0.0);
        // With lambda 0 the filter degenerates to plain top-k.
        for pair in selected.windows(2) {
            assert!(pair[0].final_score >= pair[1].final_score);
        }
    }
}
