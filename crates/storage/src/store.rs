//! The Postgres-backed memory store.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use sage_domain::config::DatabaseConfig;
use sage_domain::error::{Error, Result};
use sage_domain::memory::{MemoryContent, MemoryRole, MemoryStats, StoredMemory};
use sage_providers::EmbeddingClient;

use crate::schema::ensure_schema;

/// Rows larger than this are truncated with a visible marker.
const MAX_CONTENT_BYTES: usize = 1_048_576;
const TRUNCATION_MARKER: &str = "\n… [content truncated]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Storage layer over a fixed connection pool.
///
/// Each handler borrows one connection for the duration of a
/// transaction; the pool enforces the checkout limit.
#[derive(Clone)]
pub struct MemoryStore {
    pool: PgPool,
    embedding: EmbeddingClient,
    dimension: usize,
    fallback_scan_limit: i64,
}

impl MemoryStore {
    /// Connect, bootstrap the schema, and verify the embedding
    /// dimension against a provider probe. Refuses to start on a
    /// mismatch.
    pub async fn connect(cfg: &DatabaseConfig, embedding: EmbeddingClient) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.pool_size)
            .connect(&cfg.connect_url())
            .await
            .map_err(map_sqlx)?;

        let dimension = embedding.dimension();
        ensure_schema(&pool, dimension).await?;

        let probed = embedding.probe().await?;
        if probed != dimension {
            return Err(Error::Config(format!(
                "embedding provider returns dimension {probed}, configured {dimension}"
            )));
        }

        tracing::info!(
            host = %cfg.host,
            pool_size = cfg.pool_size,
            dimension,
            "memory store ready"
        );

        Ok(Self {
            pool,
            embedding,
            dimension,
            fallback_scan_limit: cfg.fallback_scan_limit,
        })
    }

    /// Begin an explicit transaction for multi-row operations.
    pub async fn transaction(&self) -> Result<Transaction<'_, Postgres>> {
        self.pool.begin().await.map_err(map_sqlx)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    // ── save ─────────────────────────────────────────────────────────

    /// Persist one turn as one or two rows with their embedding.
    ///
    /// Inside a single transaction: insert the row(s), request one
    /// embedding for the user + assistant concatenation, set the
    /// vector column, commit. Any failure rolls the whole turn back.
    pub async fn save(&self, content: &MemoryContent) -> Result<String> {
        if content.user_input.is_empty() && content.assistant_response.is_empty() {
            return Err(Error::InvalidInput(
                "both user input and assistant response are empty".into(),
            ));
        }
        let session_id = parse_session_id(&content.session_id)?;

        let mut tx = self.transaction().await?;
        let mut row_ids: Vec<i64> = Vec::with_capacity(2);

        for (role, text) in turn_sides(content) {
            let text = guard_content(text);
            let id: i64 = sqlx::query(
                "INSERT INTO conversations
                     (session_id, turn_id, role, content, metadata,
                      is_agent_report, agent_metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (session_id, turn_id, role) DO UPDATE
                     SET content = EXCLUDED.content,
                         metadata = EXCLUDED.metadata,
                         is_agent_report = EXCLUDED.is_agent_report,
                         agent_metadata = EXCLUDED.agent_metadata,
                         embedding = NULL
                 RETURNING id",
            )
            .bind(session_id)
            .bind(content.turn_index)
            .bind(role.as_str())
            .bind(text.as_ref())
            .bind(&content.metadata)
            .bind(content.is_agent_report)
            .bind(&content.agent_metadata)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .try_get(0)
            .map_err(map_sqlx)?;

            row_ids.push(id);
        }

        // Embedding failure must leave the store unchanged.
        let combined = combined_text(content);
        let vector = match self.embedding.embed(&combined).await {
            Ok(v) => Vector::from(v),
            Err(e) => {
                tx.rollback().await.ok();
                return Err(e);
            }
        };

        for id in &row_ids {
            sqlx::query("UPDATE conversations SET embedding = $1 WHERE id = $2")
                .bind(&vector)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx)?;
        }

        tx.commit().await.map_err(map_sqlx)?;

        let memory_id = row_ids
            .first()
            .map(|id| id.to_string())
            .unwrap_or_default();
        tracing::info!(
            memory_id = %memory_id,
            session_id = %content.session_id,
            turn_index = content.turn_index,
            rows = row_ids.len(),
            "turn persisted"
        );
        Ok(memory_id)
    }

    // ── search ───────────────────────────────────────────────────────

    /// Vector-similarity read, ordered by ascending cosine distance.
    ///
    /// Falls back to a bounded sequential scan with in-process cosine
    /// when the vector path fails (index or extension missing).
    pub async fn search_vector(
        &self,
        query_embedding: &[f32],
        limit: i64,
    ) -> Result<Vec<StoredMemory>> {
        let vector = Vector::from(query_embedding.to_vec());
        let rows = sqlx::query(
            "SELECT id, session_id, turn_id, role, content, metadata, created_at,
                    (embedding <=> $1)::float8 AS distance
             FROM conversations
             WHERE embedding IS NOT NULL
             ORDER BY embedding <=> $1
             LIMIT $2",
        )
        .bind(&vector)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;

        match rows {
            Ok(rows) => rows
                .into_iter()
                .map(|row| {
                    let distance: f64 = row.try_get("distance").map_err(map_sqlx)?;
                    row_to_memory(&row, similarity_from_distance(distance))
                })
                .collect(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    limit = self.fallback_scan_limit,
                    "vector search failed, degrading to sequential scan"
                );
                self.sequential_scan(query_embedding, limit).await
            }
        }
    }

    async fn sequential_scan(
        &self,
        query_embedding: &[f32],
        limit: i64,
    ) -> Result<Vec<StoredMemory>> {
        let rows = sqlx::query(
            "SELECT id, session_id, turn_id, role, content, metadata, created_at,
                    embedding
             FROM conversations
             WHERE embedding IS NOT NULL
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(self.fallback_scan_limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let mut scored: Vec<StoredMemory> = Vec::with_capacity(rows.len());
        for row in rows {
            let stored_vec: Option<Vector> = row.try_get("embedding").map_err(map_sqlx)?;
            let Some(stored_vec) = stored_vec else {
                continue;
            };
            let similarity = cosine_similarity(query_embedding, stored_vec.as_slice());
            scored.push(row_to_memory(&row, similarity)?);
        }

        scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        scored.truncate(limit.max(0) as usize);
        Ok(scored)
    }

    // ── reads ────────────────────────────────────────────────────────

    /// The most recent rows, for temporal fallbacks.
    pub async fn get_recent(&self, n: i64) -> Result<Vec<StoredMemory>> {
        let rows = sqlx::query(
            "SELECT id, session_id, turn_id, role, content, metadata, created_at
             FROM conversations
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(n)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.iter().map(|row| row_to_memory(row, 0.0)).collect()
    }

    pub async fn get_stats(&self) -> Result<MemoryStats> {
        let row = sqlx::query(
            "SELECT count(*) AS total,
                    count(DISTINCT session_id) AS sessions,
                    count(embedding) AS with_embeddings,
                    min(created_at) AS earliest,
                    max(created_at) AS latest
             FROM conversations",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;

        let earliest: Option<DateTime<Utc>> = row.try_get("earliest").map_err(map_sqlx)?;
        let latest: Option<DateTime<Utc>> = row.try_get("latest").map_err(map_sqlx)?;
        let range_days = match (earliest, latest) {
            (Some(e), Some(l)) => Some((l - e).num_days()),
            _ => None,
        };

        Ok(MemoryStats {
            total: row.try_get("total").map_err(map_sqlx)?,
            sessions: row.try_get("sessions").map_err(map_sqlx)?,
            with_embeddings: row.try_get("with_embeddings").map_err(map_sqlx)?,
            earliest,
            latest,
            range_days,
        })
    }

    /// The next free turn index for a session (1-based).
    pub async fn next_turn_index(&self, session_id: &str) -> Result<i32> {
        let session_id = parse_session_id(session_id)?;
        let row = sqlx::query(
            "SELECT coalesce(max(turn_id), 0) AS last FROM conversations WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        let last: i32 = row.try_get("last").map_err(map_sqlx)?;
        Ok(last + 1)
    }

    /// Remove every row of one session. Returns the deleted count.
    pub async fn clear_session(&self, session_id: &str) -> Result<u64> {
        let session_id = parse_session_id(session_id)?;
        let result = sqlx::query("DELETE FROM conversations WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        tracing::info!(
            session_id = %session_id,
            deleted = result.rows_affected(),
            "session cleared"
        );
        Ok(result.rows_affected())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_session_id(raw: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|_| Error::InvalidInput(format!("session_id is not a UUID: {raw}")))
}

/// The non-empty sides of a turn, user side first.
fn turn_sides(content: &MemoryContent) -> Vec<(MemoryRole, &str)> {
    let mut sides = Vec::with_capacity(2);
    if !content.user_input.is_empty() {
        sides.push((MemoryRole::User, content.user_input.as_str()));
    }
    if !content.assistant_response.is_empty() {
        sides.push((MemoryRole::Assistant, content.assistant_response.as_str()));
    }
    sides
}

fn combined_text(content: &MemoryContent) -> String {
    match (
        content.user_input.is_empty(),
        content.assistant_response.is_empty(),
    ) {
        (false, false) => format!("{}\n{}", content.user_input, content.assistant_response),
        (false, true) => content.user_input.clone(),
        _ => content.assistant_response.clone(),
    }
}

/// Truncate oversize content on a char boundary, marking the cut.
fn guard_content(text: &str) -> std::borrow::Cow<'_, str> {
    if text.len() <= MAX_CONTENT_BYTES {
        return std::borrow::Cow::Borrowed(text);
    }
    let mut cut = MAX_CONTENT_BYTES - TRUNCATION_MARKER.len();
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    tracing::warn!(
        original_bytes = text.len(),
        kept_bytes = cut,
        "content exceeds row guard, truncating"
    );
    std::borrow::Cow::Owned(format!("{}{}", &text[..cut], TRUNCATION_MARKER))
}

/// Cosine distance ∈ [0, 2] mapped onto a similarity ∈ [0, 1].
fn similarity_from_distance(distance: f64) -> f64 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    // cosine ∈ [-1, 1] maps to the same scale as the distance form.
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn row_to_memory(row: &sqlx::postgres::PgRow, similarity: f64) -> Result<StoredMemory> {
    let session_id: Uuid = row.try_get("session_id").map_err(map_sqlx)?;
    let role_raw: String = row.try_get("role").map_err(map_sqlx)?;
    let role: MemoryRole = role_raw
        .parse()
        .map_err(|e: String| Error::StorageFatal(e))?;
    let metadata: Option<serde_json::Value> = row.try_get("metadata").map_err(map_sqlx)?;

    Ok(StoredMemory {
        id: row.try_get("id").map_err(map_sqlx)?,
        session_id: session_id.to_string(),
        turn_index: row.try_get("turn_id").map_err(map_sqlx)?,
        role,
        content: row.try_get("content").map_err(map_sqlx)?,
        created_at: row.try_get("created_at").map_err(map_sqlx)?,
        metadata: metadata.unwrap_or(serde_json::Value::Null),
        similarity,
    })
}

/// Classify a driver error into the transient / fatal split the
/// retry policy depends on.
pub(crate) fn map_sqlx(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Error::StorageTransient(e.to_string()),
        sqlx::Error::Database(db) => {
            let code = db.code().unwrap_or_default();
            // Serialization failure, deadlock, connection and
            // resource classes are retryable.
            if code == "40001"
                || code == "40P01"
                || code.starts_with("08")
                || code.starts_with("53")
            {
                Error::StorageTransient(e.to_string())
            } else {
                Error::StorageFatal(e.to_string())
            }
        }
        _ => Error::StorageFatal(e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn content(user: &str, assistant: &str) -> MemoryContent {
        MemoryContent {
            session_id: "1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61".into(),
            turn_index: 1,
            user_input: user.into(),
            assistant_response: assistant.into(),
            metadata: serde_json::Value::Null,
            is_agent_report: false,
            agent_metadata: None,
        }
    }

    #[test]
    fn sides_follow_emptiness() {
        assert_eq!(turn_sides(&content("q", "a")).len(), 2);
        let assistant_only_content = content("", "a");
        let assistant_only = turn_sides(&assistant_only_content);
        assert_eq!(assistant_only.len(), 1);
        assert_eq!(assistant_only[0].0, MemoryRole::Assistant);
    }

    #[test]
    fn combined_text_skips_empty_sides() {
        assert_eq!(combined_text(&content("q", "a")), "q\na");
        assert_eq!(combined_text(&content("", "a")), "a");
        assert_eq!(combined_text(&content("q", "")), "q");
    }

    #[test]
    fn similarity_is_clamped() {
        assert_eq!(similarity_from_distance(0.0), 1.0);
        assert_eq!(similarity_from_distance(2.0), 0.0);
        assert_eq!(similarity_from_distance(2.5), 0.0);
        assert!((similarity_from_distance(1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn content_guard_truncates_with_marker() {
        let big = "x".repeat(MAX_CONTENT_BYTES + 100);
        let guarded = guard_content(&big);
        assert!(guarded.len() <= MAX_CONTENT_BYTES);
        assert!(guarded.ends_with(TRUNCATION_MARKER));

        let small = "hello";
        assert!(matches!(
            guard_content(small),
            std::borrow::Cow::Borrowed(_)
        ));
    }

    #[test]
    fn session_id_must_be_uuid() {
        assert!(parse_session_id("not-a-uuid").is_err());
        assert!(parse_session_id("1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61").is_ok());
    }
}
