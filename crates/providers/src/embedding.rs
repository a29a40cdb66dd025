//! Embedding provider client.
//!
//! `EmbeddingClient` wraps a `reqwest::Client` and turns a string
//! into a fixed-dimension float vector via `POST /v1/embeddings`,
//! with automatic retry + exponential back-off on transient (5xx /
//! timeout) failures.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sage_domain::config::EmbeddingConfig;
use sage_domain::error::{Error, ProviderErrorKind, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// POST /v1/embeddings — request body.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    encoding_format: &'a str,
}

/// POST /v1/embeddings — response body.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A client for the remote embedding provider.
///
/// Created once and reused for the lifetime of the process. The
/// underlying `reqwest::Client` maintains a connection pool.
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    max_retries: u32,
}

impl EmbeddingClient {
    /// Build a new client from the shared [`EmbeddingConfig`].
    pub fn new(cfg: &EmbeddingConfig) -> Result<Self> {
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
            dimension: cfg.dimension,
            max_retries: cfg.max_retries,
        })
    }

    /// The dimension every returned vector is expected to have.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed one text. Never silently returns a zero vector: on any
    /// final failure the typed provider error is propagated.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.request_embedding(text).await?;

        if vector.len() != self.dimension {
            return Err(Error::Provider {
                kind: ProviderErrorKind::Schema,
                message: format!(
                    "embedding dimension {} does not match configured {}",
                    vector.len(),
                    self.dimension
                ),
            });
        }

        Ok(vector)
    }

    /// Probe the provider once and return the dimension it actually
    /// produces. Startup refuses to proceed on a mismatch.
    pub async fn probe(&self) -> Result<usize> {
        let vector = self.request_embedding("dimension probe").await?;
        Ok(vector.len())
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        // The text is hashed for request correlation only.
        let correlation = correlation_id(text);
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let body = EmbeddingRequest {
                model: &self.model,
                input: text,
                encoding_format: "float",
            };
            let mut rb = self
                .http
                .post(&url)
                .header("X-Correlation-Id", &correlation)
                .json(&body);
            if let Some(ref key) = self.api_key {
                rb = rb.bearer_auth(key);
            }

            match rb.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let duration_ms = start.elapsed().as_millis() as u64;
                    tracing::debug!(
                        status = status.as_u16(),
                        duration_ms,
                        correlation = %correlation,
                        "embedding request"
                    );

                    if status.is_server_error() {
                        // 5xx — transient, retry
                        let text = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::Provider {
                            kind: ProviderErrorKind::Provider5xx,
                            message: format!("embeddings returned {status}: {text}"),
                        });
                        continue;
                    }

                    if status.is_client_error() {
                        // 4xx — permanent, do NOT retry
                        let kind = if status == StatusCode::REQUEST_TIMEOUT {
                            ProviderErrorKind::Timeout
                        } else {
                            ProviderErrorKind::Provider4xx
                        };
                        let text = resp.text().await.unwrap_or_default();
                        return Err(Error::Provider {
                            kind,
                            message: format!("embeddings returned {status}: {text}"),
                        });
                    }

                    let parsed: EmbeddingResponse =
                        resp.json().await.map_err(|e| Error::Provider {
                            kind: ProviderErrorKind::Schema,
                            message: format!("malformed embeddings response: {e}"),
                        })?;

                    let vector = parsed
                        .data
                        .into_iter()
                        .next()
                        .map(|d| d.embedding)
                        .ok_or_else(|| Error::Provider {
                            kind: ProviderErrorKind::Schema,
                            message: "embeddings response carried no data".into(),
                        })?;

                    if vector.is_empty() {
                        return Err(Error::Provider {
                            kind: ProviderErrorKind::Schema,
                            message: "embeddings response carried an empty vector".into(),
                        });
                    }

                    return Ok(vector);
                }
                Err(e) => {
                    last_err = Some(from_reqwest(e));
                    // Timeouts and connection errors are transient — retry
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Provider {
            kind: ProviderErrorKind::Timeout,
            message: "embeddings: all retries exhausted".into(),
        }))
    }
}

/// Short stable hash of the input, for log correlation only.
fn correlation_id(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// Convert a `reqwest::Error` into the typed provider error.
pub(crate) fn from_reqwest(e: reqwest::Error) -> Error {
    let kind = if e.is_timeout() {
        ProviderErrorKind::Timeout
    } else {
        ProviderErrorKind::Provider5xx
    };
    Error::Provider {
        kind,
        message: e.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_provider_shape() {
        let raw = r#"{"data": [{"embedding": [0.1, -0.2, 0.3]}]}"#;
        let resp: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.data[0].embedding.len(), 3);
    }

    #[test]
    fn response_with_extra_fields_still_parses() {
        let raw = r#"{
            "object": "list",
            "model": "Qwen/Qwen3-Embedding-8B",
            "data": [{"index": 0, "object": "embedding", "embedding": [1.0]}],
            "usage": {"prompt_tokens": 3}
        }"#;
        let resp: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.data[0].embedding, vec![1.0]);
    }

    #[test]
    fn correlation_id_is_stable() {
        assert_eq!(correlation_id("abc"), correlation_id("abc"));
        assert_ne!(correlation_id("abc"), correlation_id("abd"));
        assert_eq!(correlation_id("abc").len(), 16);
    }

    #[test]
    fn request_serializes_float_format() {
        let req = EmbeddingRequest {
            model: "m",
            input: "hello",
            encoding_format: "float",
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"encoding_format\":\"float\""));
    }
}
