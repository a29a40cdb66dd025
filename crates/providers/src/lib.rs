//! Remote provider clients: embedding and reranking.
//!
//! Both clients wrap a `reqwest::Client` with timeout, bounded retry
//! and exponential back-off. They are stateless and safe to call from
//! many tasks at once; the underlying client maintains the connection
//! pool.

pub mod embedding;
pub mod reranker;

pub use embedding::EmbeddingClient;
pub use reranker::{RerankMode, RerankScore, RerankerClient};
