//! The stop-hook pipeline: parse → aggregate → assemble → backup →
//! persist → cleanup.
//!
//! Exit codes: 0 success, 1 fail-fast (no usable input), 2 partial
//! (backup written, database skipped). The whole pipeline runs under
//! a global wall clock; on breach the database write is abandoned,
//! never the backup.

use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use sage_domain::config::Config;
use sage_domain::error::Result;
use sage_domain::memory::MemoryContent;
use sage_hooks::{Aggregator, HookStateStore};
use sage_providers::EmbeddingClient;
use sage_storage::{BackupWriter, MemoryStore};
use sage_transcript::{assemble_turn, AssembleRequest, TranscriptParser};

use crate::capture::project_identity;
use crate::input::HookInput;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAIL_FAST: i32 = 1;
pub const EXIT_PARTIAL: i32 = 2;

/// Run the pipeline and return the process exit code.
pub async fn run_stop(raw_input: &str, config: &Config) -> i32 {
    let started = Instant::now();
    let budget = Duration::from_secs(config.hooks.stop_timeout_secs);

    let Some(input) = HookInput::from_raw(raw_input) else {
        eprintln!("ERROR: No input provided");
        return EXIT_FAIL_FAST;
    };

    // ── parse the transcript ────────────────────────────────────────
    let parser = TranscriptParser::default();
    let (parsed, source) = match (&input.transcript_path, &input.content) {
        (Some(path), _) if !path.is_empty() => {
            match parser.parse_jsonl(Path::new(path)) {
                Ok(parsed) => (parsed, "claude_cli_jsonl"),
                Err(e) => {
                    eprintln!("ERROR: transcript not readable: {e}");
                    return EXIT_FAIL_FAST;
                }
            }
        }
        (_, Some(content)) if !content.is_empty() => {
            (parser.parse_text(content), "human_assistant_text")
        }
        _ => {
            eprintln!("ERROR: unsupported input format");
            return EXIT_FAIL_FAST;
        }
    };
    if parsed.messages.is_empty() {
        eprintln!("ERROR: no messages extracted from transcript");
        return EXIT_FAIL_FAST;
    }

    // ── aggregate hook records ──────────────────────────────────────
    let (project_id, project_name) = project_identity(input.cwd.as_deref());
    let store = match HookStateStore::open(config.hooks.state_dir.clone()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("ERROR: hook state unavailable: {e}");
            return EXIT_FAIL_FAST;
        }
    };
    let aggregator = Aggregator::new(store);
    let enhanced = aggregator.enhance_stop_hook_data(
        &input.session_id,
        Some(&project_id),
        parsed.tool_uses.len(),
    );

    // ── assemble the canonical turn ─────────────────────────────────
    let turn = match assemble_turn(
        &parsed,
        AssembleRequest {
            session_id: &input.session_id,
            project_id: &project_id,
            project_name: &project_name,
            source,
            hook_tool_calls: enhanced.tool_calls.clone(),
        },
    ) {
        Ok(turn) => turn,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return EXIT_FAIL_FAST;
        }
    };

    let (session_id, origin_session) = normalize_session(&input.session_id);

    let mut metadata = serde_json::to_value(&turn.metadata).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut metadata {
        if let Some(origin) = &origin_session {
            map.insert("origin_session_id".into(), Value::from(origin.clone()));
        }
        map.insert(
            "tool_calls".into(),
            serde_json::to_value(&turn.tool_calls).unwrap_or(Value::Null),
        );
        map.insert(
            "data_completeness_score".into(),
            Value::from(enhanced.completeness),
        );
        map.insert(
            "aggregation_stats".into(),
            serde_json::to_value(&enhanced.stats).unwrap_or(Value::Null),
        );
    }

    let content = MemoryContent {
        session_id: session_id.clone(),
        turn_index: 0, // assigned against the store below
        user_input: turn.user_prompt.clone(),
        assistant_response: turn.assistant_response.clone(),
        metadata: metadata.clone(),
        is_agent_report: metadata
            .get("is_agent_report")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        agent_metadata: metadata.get("agent_metadata").cloned(),
    };

    // ── backup first, database second ───────────────────────────────
    let backup = BackupWriter::new(
        config
            .server
            .config_dir
            .as_ref()
            .map(|dir| dir.join("backups"))
            .unwrap_or_else(BackupWriter::default_dir),
    );
    let dump = serde_json::json!({
        "session_id": session_id,
        "user_prompt": content.user_input,
        "assistant_response": content.assistant_response,
        "metadata": metadata,
    });
    if let Err(e) = backup.write(&session_id, &dump) {
        tracing::error!(error = %e, "backup write failed");
    }

    let remaining = budget.saturating_sub(started.elapsed());
    if remaining.is_zero() {
        tracing::warn!("wall clock exhausted before database save, keeping backup only");
        return EXIT_PARTIAL;
    }

    match tokio::time::timeout(remaining, persist(config, content)).await {
        Ok(Ok(memory_id)) => {
            tracing::info!(memory_id = %memory_id, "turn persisted");
            let removed = aggregator.cleanup_processed(&enhanced.tool_calls);
            tracing::debug!(removed, "consumed hook records cleaned");
            aggregator.cleanup_old(Duration::from_secs(config.hooks.eviction_hours * 3600));
            EXIT_SUCCESS
        }
        Ok(Err(e)) => {
            tracing::error!(kind = e.kind(), error = %e, "database save failed, backup retained");
            EXIT_PARTIAL
        }
        Err(_) => {
            tracing::warn!(
                timeout_secs = config.hooks.stop_timeout_secs,
                "database save timed out, backup retained"
            );
            EXIT_PARTIAL
        }
    }
}

async fn persist(config: &Config, mut content: MemoryContent) -> Result<String> {
    let embedding = EmbeddingClient::new(&config.embedding)?;
    let store = MemoryStore::connect(&config.database, embedding).await?;
    content.turn_index = store.next_turn_index(&content.session_id).await?;
    store.save(&content).await
}

/// Host session ids are normally UUIDs; anything else gets a minted
/// one with the original kept as provenance.
fn normalize_session(raw: &str) -> (String, Option<String>) {
    if Uuid::parse_str(raw).is_ok() {
        (raw.to_owned(), None)
    } else {
        let minted = Uuid::new_v4().to_string();
        let origin = (!raw.is_empty()).then(|| raw.to_owned());
        (minted, origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_sessions_pass_through() {
        let (id, origin) = normalize_session("1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61");
        assert_eq!(id, "1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61");
        assert!(origin.is_none());
    }

    #[test]
    fn other_sessions_are_minted_with_provenance() {
        let (id, origin) = normalize_session("text-session-1700000000");
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(origin.as_deref(), Some("text-session-1700000000"));

        let (_, no_origin) = normalize_session("");
        assert!(no_origin.is_none());
    }

    #[tokio::test]
    async fn empty_input_fails_fast() {
        let code = run_stop("", &Config::default()).await;
        assert_eq!(code, EXIT_FAIL_FAST);
    }

    #[tokio::test]
    async fn unsupported_json_fails_fast() {
        let code = run_stop(r#"{"session_id": "s1"}"#, &Config::default()).await;
        assert_eq!(code, EXIT_FAIL_FAST);
    }
}
