//! Schema bootstrap for the `conversations` table.

use sqlx::PgPool;

use sage_domain::error::Result;

use crate::store::map_sqlx;

/// Create the extension, table and indexes if they do not exist.
///
/// `dimension` is the configured embedding dimension; it is baked
/// into the column type, so changing it requires a migration.
pub(crate) async fn ensure_schema(pool: &PgPool, dimension: usize) -> Result<()> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await
        .map_err(map_sqlx)?;

    let create_table = format!(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          bigserial PRIMARY KEY,
            session_id  uuid      NOT NULL DEFAULT gen_random_uuid(),
            turn_id     int       NOT NULL,
            role        varchar(50) NOT NULL,
            content     text      NOT NULL,
            embedding   vector({dimension}),
            metadata    jsonb,
            is_agent_report boolean,
            agent_metadata  jsonb,
            created_at  timestamptz NOT NULL DEFAULT now()
        )"
    );
    sqlx::query(&create_table)
        .execute(pool)
        .await
        .map_err(map_sqlx)?;

    // One row per (session, turn, side); a second save updates it.
    let indexes = [
        "CREATE UNIQUE INDEX IF NOT EXISTS conversations_turn_side
             ON conversations (session_id, turn_id, role)",
        "CREATE INDEX IF NOT EXISTS conversations_embedding
             ON conversations USING ivfflat (embedding vector_cosine_ops)",
        "CREATE INDEX IF NOT EXISTS conversations_created_at
             ON conversations (created_at DESC)",
        "CREATE INDEX IF NOT EXISTS conversations_session_id
             ON conversations (session_id)",
    ];
    for stmt in indexes {
        if let Err(e) = sqlx::query(stmt).execute(pool).await {
            // The ivfflat index needs the extension's access method;
            // queries still work without it, via the scan fallback.
            tracing::warn!(error = %e, "index creation failed");
        }
    }

    tracing::info!(dimension, "conversations schema ready");
    Ok(())
}
