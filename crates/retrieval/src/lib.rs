//! Intelligent context retrieval.
//!
//! Pipeline: analyse the query, pull vector-similar candidates from
//! storage, rescore them with temporal / contextual / keyword
//! signals, optionally refine through the neural reranker, enforce
//! diversity, and cache the final list.

pub mod analyzer;
pub mod cache;
pub mod engine;
pub mod format;
pub mod scoring;
pub mod temporal;

pub use analyzer::SemanticAnalyzer;
pub use cache::QueryCache;
pub use engine::{RetrieveOptions, RetrievalEngine};
pub use format::format_context;
pub use scoring::HybridScorer;
pub use temporal::TemporalScorer;
