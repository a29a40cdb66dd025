//! Canonical turn assembly.
//!
//! Joins the parsed transcript with the aggregated hook tool calls
//! and produces the single [`Turn`] the stop hook persists.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use sage_domain::error::{Error, Result};
use sage_domain::turn::{contains_code, ToolCall, ToolStatus, Turn};

use crate::parser::{ParsedTranscript, SUBMIT_HOOK_TAG};

/// Synthetic prompt used when a turn consists entirely of system or
/// tool events.
const ARCHIVE_PROMPT: &str = "Conversation Archive";

/// Everything the assembler needs besides the parsed transcript.
pub struct AssembleRequest<'a> {
    pub session_id: &'a str,
    pub project_id: &'a str,
    pub project_name: &'a str,
    /// Input-format tag recorded in metadata (e.g. `claude_cli_jsonl`
    /// or `human_assistant_text`).
    pub source: &'a str,
    /// Hook-derived tool calls; richer than transcript refs and
    /// preferred on call-id collisions.
    pub hook_tool_calls: Vec<ToolCall>,
}

/// Build one canonical [`Turn`] for persistence.
///
/// Selection: the last non-injected user message and the last
/// assistant message. Either side may be absent; a turn with at least
/// one non-empty side persists. When neither side exists but raw
/// messages do, the whole exchange is archived under a synthetic
/// prompt. An empty transcript fails fast.
pub fn assemble_turn(parsed: &ParsedTranscript, req: AssembleRequest<'_>) -> Result<Turn> {
    if parsed.messages.is_empty() {
        return Err(Error::InvalidInput(
            "no messages extracted from transcript".into(),
        ));
    }

    let last_user = parsed
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user" && !m.content.contains(SUBMIT_HOOK_TAG));
    let last_assistant = parsed.messages.iter().rev().find(|m| m.role == "assistant");

    let (user_prompt, assistant_response) = match (last_user, last_assistant) {
        (Some(user), Some(assistant)) => (user.content.clone(), assistant.content.clone()),
        (Some(user), None) => (user.content.clone(), String::new()),
        (None, Some(assistant)) => (String::new(), assistant.content.clone()),
        (None, None) => {
            // Only injected / unattributable messages: archive them.
            let archive = parsed
                .messages
                .iter()
                .map(|m| {
                    let role = if m.role == "user" { "User" } else { "Assistant" };
                    format!("{role}: {}", m.content)
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            (ARCHIVE_PROMPT.to_owned(), archive)
        }
    };

    if user_prompt.is_empty() && assistant_response.is_empty() {
        return Err(Error::InvalidInput(
            "both conversation sides are empty".into(),
        ));
    }
    match (user_prompt.is_empty(), assistant_response.is_empty()) {
        (true, false) => tracing::info!("Assistant-only turn"),
        (false, true) => tracing::info!("User-only turn"),
        _ => {}
    }

    let tool_calls = merge_tool_calls(req.hook_tool_calls, parsed);
    let agent_report = last_assistant.and_then(|m| m.agent_report.clone());

    let mut turn = Turn::new(req.session_id);
    turn.user_prompt = user_prompt;
    turn.assistant_response = assistant_response;
    turn.timestamp = message_instant(last_assistant.or(last_user)).unwrap_or_else(Utc::now);

    // Metadata values must stay JSON-safe: strings, numbers, bools.
    let meta = &mut turn.metadata;
    meta.insert("session_id".into(), Value::from(req.session_id));
    meta.insert("project_id".into(), Value::from(req.project_id));
    meta.insert("project_name".into(), Value::from(req.project_name));
    meta.insert("source".into(), Value::from(req.source));
    meta.insert(
        "processing_timestamp".into(),
        Value::from(Utc::now().to_rfc3339()),
    );
    meta.insert(
        "has_tool_interactions".into(),
        Value::from(!tool_calls.is_empty()),
    );
    meta.insert("tool_call_count".into(), Value::from(tool_calls.len()));
    meta.insert("message_count".into(), Value::from(parsed.messages.len()));
    meta.insert(
        "query_length".into(),
        Value::from(turn.user_prompt.chars().count()),
    );
    meta.insert(
        "response_length".into(),
        Value::from(turn.assistant_response.chars().count()),
    );
    meta.insert(
        "has_code".into(),
        Value::from(contains_code(&turn.user_prompt) || contains_code(&turn.assistant_response)),
    );
    if let Some(report) = &agent_report {
        meta.insert("is_agent_report".into(), Value::from(true));
        meta.insert("agent_metadata".into(), serde_json::to_value(report)?);
    }

    turn.tool_calls = tool_calls;
    Ok(turn)
}

/// Prefer hook-derived calls, fall back to transcript refs, dedupe by
/// call id. Transcript-only uses are joined with their results where
/// possible.
fn merge_tool_calls(hook_calls: Vec<ToolCall>, parsed: &ParsedTranscript) -> Vec<ToolCall> {
    let mut seen: HashSet<String> = hook_calls.iter().map(|c| c.call_id.clone()).collect();
    let mut merged = hook_calls;

    for use_ref in &parsed.tool_uses {
        if use_ref.tool_use_id.is_empty() || !seen.insert(use_ref.tool_use_id.clone()) {
            continue;
        }
        let result = parsed
            .tool_results
            .iter()
            .find(|r| r.tool_use_id == use_ref.tool_use_id);

        let (tool_output, status, error_message) = match result {
            Some(r) if r.is_error => (
                Value::from(r.content.clone()),
                ToolStatus::Error,
                Some(r.content.clone()),
            ),
            Some(r) => (Value::from(r.content.clone()), ToolStatus::Success, None),
            None => (Value::Null, ToolStatus::Pending, None),
        };

        merged.push(ToolCall {
            call_id: use_ref.tool_use_id.clone(),
            tool_name: use_ref.tool_name.clone(),
            tool_input: use_ref.tool_input.clone(),
            tool_output,
            status,
            error_message,
            execution_time_ms: None,
            timestamp: use_ref
                .timestamp
                .as_deref()
                .and_then(parse_instant)
                .unwrap_or_else(Utc::now),
        });
    }

    merged.sort_by_key(|c| c.timestamp);
    merged
}

fn message_instant(message: Option<&crate::parser::ParsedMessage>) -> Option<DateTime<Utc>> {
    message?.timestamp.as_deref().and_then(parse_instant)
}

fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TranscriptParser;

    fn request(hook_calls: Vec<ToolCall>) -> AssembleRequest<'static> {
        AssembleRequest {
            session_id: "1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61",
            project_id: "abcdef012345",
            project_name: "demo",
            source: "claude_cli_jsonl",
            hook_tool_calls: hook_calls,
        }
    }

    fn parse(raw: &str) -> ParsedTranscript {
        TranscriptParser::default().parse_jsonl_str(raw)
    }

    #[test]
    fn both_sides_selected_from_tail() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"old question"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"old answer"}}"#,
            "\n",
            r#"{"type":"user","message":{"content":"What is a B-tree?"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"A self-balancing search tree."}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert_eq!(turn.user_prompt, "What is a B-tree?");
        assert_eq!(turn.assistant_response, "A self-balancing search tree.");
        assert_eq!(turn.metadata["has_code"], Value::from(false));
    }

    #[test]
    fn injected_user_messages_are_skipped() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"real question"}}"#,
            "\n",
            r#"{"type":"user","message":{"content":"<user-prompt-submit-hook>injected</user-prompt-submit-hook>"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"answer"}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert_eq!(turn.user_prompt, "real question");
    }

    #[test]
    fn assistant_only_turn_is_allowed() {
        let raw = concat!(
            r#"{"type":"assistant","message":{"content":"Tool execution result: Success (exit=0)"}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert!(turn.user_prompt.is_empty());
        assert!(!turn.assistant_response.is_empty());
    }

    #[test]
    fn empty_transcript_fails_fast() {
        let parsed = ParsedTranscript::default();
        assert!(assemble_turn(&parsed, request(vec![])).is_err());
    }

    #[test]
    fn submit_hook_only_transcript_archives() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"<user-prompt-submit-hook>ctx</user-prompt-submit-hook>"}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert_eq!(turn.user_prompt, ARCHIVE_PROMPT);
        assert!(turn.assistant_response.contains("User:"));
    }

    #[test]
    fn hook_calls_win_over_transcript_refs() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"run ls"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"sure"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
            "\n",
        );
        let hook_call = ToolCall {
            call_id: "t1".into(),
            tool_name: "Bash".into(),
            tool_input: serde_json::json!({"command": "ls"}),
            tool_output: serde_json::json!("file.txt"),
            status: ToolStatus::Success,
            error_message: None,
            execution_time_ms: Some(18),
            timestamp: Utc::now(),
        };
        let turn = assemble_turn(&parse(raw), request(vec![hook_call])).unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        // The hook-derived call kept its output and timing.
        assert_eq!(turn.tool_calls[0].execution_time_ms, Some(18));
        assert_eq!(turn.metadata["has_tool_interactions"], Value::from(true));
    }

    #[test]
    fn transcript_only_use_joins_its_result() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"run ls"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t2","name":"Bash","input":{}}]}}"#,
            "\n",
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t2","content":"oops","is_error":true}]}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].status, ToolStatus::Error);
        assert_eq!(turn.tool_calls[0].error_message.as_deref(), Some("oops"));
    }

    #[test]
    fn code_content_is_flagged() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"show me"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"```rust\nfn main() {}\n```"}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert_eq!(turn.metadata["has_code"], Value::from(true));
    }

    #[test]
    fn agent_report_lands_in_metadata() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"delegate"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"=== Report by @auditor ===\nSuccess"}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        assert_eq!(turn.metadata["is_agent_report"], Value::from(true));
        assert_eq!(turn.metadata["agent_metadata"]["agent_name"], "auditor");
    }

    #[test]
    fn serialised_turn_reparses_identically() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"q"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":"a"}}"#,
            "\n",
        );
        let turn = assemble_turn(&parse(raw), request(vec![])).unwrap();
        let json = serde_json::to_string(&turn).unwrap();
        let reparsed: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed.user_prompt, turn.user_prompt);
        assert_eq!(reparsed.assistant_response, turn.assistant_response);
        assert_eq!(reparsed.metadata, turn.metadata);
    }
}
