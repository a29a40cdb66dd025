//! Persisted-memory value types: what the storage layer reads and
//! writes, independent of the SQL driver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which side of a turn a stored row represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    User,
    Assistant,
}

impl MemoryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryRole::User => "user",
            MemoryRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MemoryRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MemoryRole::User),
            "assistant" => Ok(MemoryRole::Assistant),
            other => Err(format!("unknown memory role: {other}")),
        }
    }
}

/// The content handed to the storage layer for one turn.
///
/// Becomes one row per non-empty side (user and/or assistant) inside
/// a single transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContent {
    pub session_id: String,
    pub turn_index: i32,
    pub user_input: String,
    pub assistant_response: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub is_agent_report: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_metadata: Option<Value>,
}

/// A persisted row read back from the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMemory {
    pub id: i64,
    pub session_id: String,
    pub turn_index: i32,
    pub role: MemoryRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
    /// Cosine similarity in [0, 1] when produced by a vector search;
    /// 0.0 for plain reads.
    #[serde(default)]
    pub similarity: f64,
}

/// Aggregate statistics over the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: i64,
    pub sessions: i64,
    pub with_embeddings: i64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub range_days: Option<i64>,
}
