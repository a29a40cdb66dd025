//! Reranker provider client.
//!
//! Scores (query, document) pairs via `POST /v1/rerank`. Documents
//! are batched by mode; a failed batch degrades to a neutral score
//! instead of failing the whole response.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use sage_domain::config::RerankerConfig;
use sage_domain::error::{Error, ProviderErrorKind, Result};
use sage_domain::query::QueryType;

use crate::embedding::from_reqwest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Modes and results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankMode {
    /// Small batches, lowest latency.
    Fast,
    Balanced,
    /// Largest batches, best ranking quality.
    Quality,
}

impl RerankMode {
    fn batch_size(&self) -> usize {
        match self {
            RerankMode::Fast => 5,
            RerankMode::Balanced => 10,
            RerankMode::Quality => 20,
        }
    }
}

/// One scored document, addressed by its index in the input slice.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankScore {
    pub original_index: usize,
    pub relevance_score: f64,
}

/// Documents in a failed batch receive this score so that a partial
/// outage degrades precision rather than breaking the response.
const NEUTRAL_SCORE: f64 = 0.5;

/// Weight of the neural score when fusing with the pre-existing
/// hybrid score: `final = w * neural + (1 - w) * original`.
pub fn fusion_weight(query_type: QueryType) -> f64 {
    match query_type {
        QueryType::Technical => 0.6,
        QueryType::Diagnostic => 0.7,
        QueryType::Conversational => 0.5,
        QueryType::Conceptual => 0.65,
        _ => 0.6,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /v1/rerank — request body.
#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    return_documents: bool,
}

/// POST /v1/rerank — response body.
#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResponseItem>,
}

#[derive(Debug, Deserialize)]
struct RerankResponseItem {
    index: usize,
    relevance_score: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client for the remote reranker provider.
#[derive(Debug, Clone)]
pub struct RerankerClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl RerankerClient {
    /// Build a new client from the shared [`RerankerConfig`].
    pub fn new(cfg: &RerankerConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(cfg.timeout())
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Other(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
            max_retries: cfg.max_retries,
        })
    }

    /// Score every document against the query.
    ///
    /// Issues one request per batch, merges the batches, sorts by
    /// relevance descending and returns either all scores or the top
    /// `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        mode: RerankMode,
        top_k: Option<usize>,
    ) -> Vec<RerankScore> {
        if documents.is_empty() {
            return Vec::new();
        }

        let batch_size = mode.batch_size().min(documents.len());
        let mut scores = Vec::with_capacity(documents.len());

        for (batch_no, batch) in documents.chunks(batch_size).enumerate() {
            let offset = batch_no * batch_size;
            match self.rerank_batch(query, batch).await {
                Ok(items) => {
                    for item in items {
                        if item.index < batch.len() {
                            scores.push(RerankScore {
                                original_index: offset + item.index,
                                relevance_score: item.relevance_score,
                            });
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        batch = batch_no,
                        size = batch.len(),
                        "rerank batch failed, assigning neutral scores"
                    );
                    for i in 0..batch.len() {
                        scores.push(RerankScore {
                            original_index: offset + i,
                            relevance_score: NEUTRAL_SCORE,
                        });
                    }
                }
            }
        }

        scores.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        if let Some(k) = top_k {
            scores.truncate(k);
        }
        scores
    }

    async fn rerank_batch(
        &self,
        query: &str,
        documents: &[String],
    ) -> Result<Vec<RerankResponseItem>> {
        let url = format!("{}/v1/rerank", self.base_url);
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let body = RerankRequest {
                model: &self.model,
                query,
                documents,
                top_n: documents.len(),
                return_documents: false,
            };
            let mut rb = self.http.post(&url).json(&body);
            if let Some(ref key) = self.api_key {
                rb = rb.bearer_auth(key);
            }

            match rb.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_server_error() {
                        let text = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Provider {
                            kind: ProviderErrorKind::Provider5xx,
                            message: format!("rerank returned {status}: {text}"),
                        });
                        continue;
                    }
                    if status.is_client_error() {
                        let text = resp.text().await.unwrap_or_default();
                        return Err(Error::Provider {
                            kind: ProviderErrorKind::Provider4xx,
                            message: format!("rerank returned {status}: {text}"),
                        });
                    }

                    let parsed: RerankResponse =
                        resp.json().await.map_err(|e| Error::Provider {
                            kind: ProviderErrorKind::Schema,
                            message: format!("malformed rerank response: {e}"),
                        })?;
                    return Ok(parsed.results);
                }
                Err(e) => {
                    last_err = Some(from_reqwest(e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Provider {
            kind: ProviderErrorKind::Timeout,
            message: "rerank: all retries exhausted".into(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_sizes_by_mode() {
        assert_eq!(RerankMode::Fast.batch_size(), 5);
        assert_eq!(RerankMode::Balanced.batch_size(), 10);
        assert_eq!(RerankMode::Quality.batch_size(), 20);
    }

    #[test]
    fn fusion_weights_by_query_type() {
        assert_eq!(fusion_weight(QueryType::Technical), 0.6);
        assert_eq!(fusion_weight(QueryType::Diagnostic), 0.7);
        assert_eq!(fusion_weight(QueryType::Conversational), 0.5);
        assert_eq!(fusion_weight(QueryType::Conceptual), 0.65);
        assert_eq!(fusion_weight(QueryType::Procedural), 0.6);
        assert_eq!(fusion_weight(QueryType::Creative), 0.6);
    }

    #[test]
    fn response_parses_provider_shape() {
        let raw = r#"{"results": [{"index": 0, "relevance_score": 0.95}, {"index": 1, "relevance_score": 0.2}]}"#;
        let resp: RerankResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[0].index, 0);
        assert!((resp.results[0].relevance_score - 0.95).abs() < 1e-12);
    }

    #[test]
    fn request_never_asks_for_documents_back() {
        let docs = vec!["a".to_owned()];
        let req = RerankRequest {
            model: "m",
            query: "q",
            documents: &docs,
            top_n: 1,
            return_documents: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"return_documents\":false"));
    }
}
