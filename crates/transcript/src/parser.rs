//! Transcript parsing.
//!
//! Two input shapes: the host CLI's newline-delimited JSON transcript
//! (one event per line, `type` ∈ user / assistant / tool_result), and
//! a plain-text `Human:` / `Assistant:` interleaved stream.
//!
//! Only the tail of the JSONL file is examined: the stop hook cares
//! about the current turn, not the whole history.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use sage_domain::error::Result;

use crate::agent_report::{AgentReport, AgentReportDetector};

/// Default number of trailing events examined per transcript.
pub const DEFAULT_TAIL_EVENTS: usize = 50;

/// Tag the host injects into synthetic user messages; turns built
/// from them are not real prompts.
pub const SUBMIT_HOOK_TAG: &str = "<user-prompt-submit-hook>";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TranscriptEvent {
    User(EventRecord),
    Assistant(EventRecord),
    ToolResult(EventRecord),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(default)]
    message: Option<EventMessage>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    #[serde(default)]
    content: ContentField,
}

/// `message.content` is either a bare string or an array of typed
/// content items.
#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
enum ContentField {
    Text(String),
    Items(Vec<ContentItem>),
    #[default]
    Missing,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentItem {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsed output
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// "user" or "assistant".
    pub role: &'static str,
    pub content: String,
    pub timestamp: Option<String>,
    pub uuid: Option<String>,
    pub agent_report: Option<AgentReport>,
}

impl ParsedMessage {
    pub fn is_submit_hook(&self) -> bool {
        self.content.contains(SUBMIT_HOOK_TAG)
    }
}

/// A `tool_use` item seen in an assistant message.
#[derive(Debug, Clone)]
pub struct ToolUseRef {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_use_id: String,
    pub timestamp: Option<String>,
}

/// A `tool_result` item, joined back to its use by id.
#[derive(Debug, Clone)]
pub struct ToolResultRef {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Default)]
pub struct ParsedTranscript {
    pub messages: Vec<ParsedMessage>,
    pub tool_uses: Vec<ToolUseRef>,
    pub tool_results: Vec<ToolResultRef>,
    pub skipped_lines: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TranscriptParser {
    detector: AgentReportDetector,
    tail_events: usize,
}

impl Default for TranscriptParser {
    fn default() -> Self {
        Self::new(DEFAULT_TAIL_EVENTS)
    }
}

impl TranscriptParser {
    pub fn new(tail_events: usize) -> Self {
        Self {
            detector: AgentReportDetector::new(),
            tail_events,
        }
    }

    /// Parse the last `tail_events` lines of a JSONL transcript.
    /// Malformed lines are skipped silently; only the count is
    /// logged.
    pub fn parse_jsonl(&self, path: &Path) -> Result<ParsedTranscript> {
        let raw = std::fs::read_to_string(path)?;
        Ok(self.parse_jsonl_str(&raw))
    }

    pub fn parse_jsonl_str(&self, raw: &str) -> ParsedTranscript {
        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(self.tail_events);

        let mut out = ParsedTranscript::default();
        for line in &lines[start..] {
            let event: TranscriptEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(_) => {
                    out.skipped_lines += 1;
                    continue;
                }
            };

            match event {
                TranscriptEvent::User(record) => self.push_message(&mut out, "user", record),
                TranscriptEvent::Assistant(record) => {
                    self.push_message(&mut out, "assistant", record)
                }
                TranscriptEvent::ToolResult(record) => {
                    // Top-level tool_result events carry only items.
                    if let Some(message) = record.message {
                        collect_tool_items(&message.content, &record.timestamp, &mut out);
                    }
                }
                TranscriptEvent::Unknown => {}
            }
        }

        if out.skipped_lines > 0 {
            tracing::warn!(
                skipped = out.skipped_lines,
                "Skipping invalid JSON line(s) in transcript"
            );
        }
        out
    }

    fn push_message(&self, out: &mut ParsedTranscript, role: &'static str, record: EventRecord) {
        let Some(message) = record.message else {
            return;
        };
        collect_tool_items(&message.content, &record.timestamp, out);

        let content = render_content(&message.content, role);
        if content.is_empty() && role != "user" {
            return;
        }

        let agent_report = if role == "assistant" {
            self.detector.detect(&content)
        } else {
            None
        };
        if let Some(report) = &agent_report {
            tracing::info!(
                agent = %report.agent_name,
                report_type = %report.report_type,
                "detected agent report"
            );
        }

        out.messages.push(ParsedMessage {
            role,
            content,
            timestamp: record.timestamp,
            uuid: record.uuid,
            agent_report,
        });
    }

    /// Parse a plain-text `Human:` / `Assistant:` stream. Anchors are
    /// case-sensitive and must start a line; continuation lines
    /// accumulate into the current role.
    pub fn parse_text(&self, content: &str) -> ParsedTranscript {
        let mut out = ParsedTranscript::default();
        let mut current_role: Option<&'static str> = None;
        let mut current: Vec<&str> = Vec::new();

        let flush =
            |role: Option<&'static str>, lines: &mut Vec<&str>, out: &mut ParsedTranscript| {
                let Some(role) = role else {
                    lines.clear();
                    return;
                };
                let text = lines.join("\n").trim().to_owned();
                lines.clear();
                if text.is_empty() {
                    return;
                }
                let agent_report = if role == "assistant" {
                    self.detector.detect(&text)
                } else {
                    None
                };
                out.messages.push(ParsedMessage {
                    role,
                    content: text,
                    timestamp: None,
                    uuid: None,
                    agent_report,
                });
            };

        for line in content.lines() {
            if let Some(rest) = line.strip_prefix("Human:") {
                flush(current_role, &mut current, &mut out);
                current_role = Some("user");
                current.push(rest.trim_start());
            } else if let Some(rest) = line.strip_prefix("Assistant:") {
                flush(current_role, &mut current, &mut out);
                current_role = Some("assistant");
                current.push(rest.trim_start());
            } else if current_role.is_some() {
                current.push(line);
            }
        }
        flush(current_role, &mut current, &mut out);

        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Flatten a content field into display text. Thinking blocks are
/// tagged rather than discarded; tool uses become a short marker.
fn render_content(content: &ContentField, role: &str) -> String {
    match content {
        ContentField::Text(text) => text.clone(),
        ContentField::Missing => String::new(),
        ContentField::Items(items) => {
            let mut parts: Vec<String> = Vec::new();
            for item in items {
                match item {
                    ContentItem::Text { text } => {
                        if !text.is_empty() {
                            parts.push(text.clone());
                        }
                    }
                    ContentItem::Thinking { thinking } => {
                        let tag = if role == "user" {
                            "[用户思维链]"
                        } else {
                            "[思维链]"
                        };
                        parts.push(format!("{tag}\n{thinking}"));
                    }
                    ContentItem::ToolUse { name, .. } => {
                        parts.push(format!("[工具调用: {name}]"));
                    }
                    ContentItem::ToolResult { content, .. } => {
                        let text = value_to_text(content);
                        if !text.is_empty() {
                            parts.push(text);
                        }
                    }
                    ContentItem::Unknown => {}
                }
            }
            parts.join("\n")
        }
    }
}

fn collect_tool_items(content: &ContentField, timestamp: &Option<String>, out: &mut ParsedTranscript) {
    let ContentField::Items(items) = content else {
        return;
    };
    for item in items {
        match item {
            ContentItem::ToolUse { id, name, input } => out.tool_uses.push(ToolUseRef {
                tool_name: name.clone(),
                tool_input: input.clone(),
                tool_use_id: id.clone(),
                timestamp: timestamp.clone(),
            }),
            ContentItem::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => out.tool_results.push(ToolResultRef {
                tool_use_id: tool_use_id.clone(),
                content: value_to_text(content),
                is_error: *is_error,
            }),
            _ => {}
        }
    }
}

/// Tool results arrive as strings, arrays of text items, or arbitrary
/// JSON; flatten to text.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("text").and_then(Value::as_str).map(str::to_owned),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> TranscriptParser {
        TranscriptParser::default()
    }

    #[test]
    fn parses_string_and_array_content() {
        let raw = concat!(
            r#"{"type":"user","uuid":"u1","timestamp":"2026-01-01T00:00:00Z","message":{"content":"hello"}}"#,
            "\n",
            r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"text","text":"hi"},{"type":"thinking","thinking":"mull"}]}}"#,
            "\n",
        );
        let parsed = parser().parse_jsonl_str(raw);
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[0].role, "user");
        assert_eq!(parsed.messages[0].content, "hello");
        assert!(parsed.messages[1].content.contains("hi"));
        assert!(parsed.messages[1].content.contains("[思维链]"));
        assert!(parsed.messages[1].content.contains("mull"));
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let raw = concat!(
            r#"{"type":"user","message":{"content":"one"}}"#,
            "\n",
            "{oops\n",
            r#"{"type":"assistant","message":{"content":"two"}}"#,
            "\n",
            "also not json\n",
            r#"{"type":"user","message":{"content":"three"}}"#,
            "\n",
        );
        let parsed = parser().parse_jsonl_str(raw);
        assert_eq!(parsed.messages.len(), 3);
        assert_eq!(parsed.skipped_lines, 2);
    }

    #[test]
    fn tool_uses_and_results_are_extracted() {
        let raw = concat!(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#,
            "\n",
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t1","content":"file.txt","is_error":false}]}}"#,
            "\n",
        );
        let parsed = parser().parse_jsonl_str(raw);
        assert_eq!(parsed.tool_uses.len(), 1);
        assert_eq!(parsed.tool_uses[0].tool_name, "Bash");
        assert_eq!(parsed.tool_results.len(), 1);
        assert_eq!(parsed.tool_results[0].content, "file.txt");
        // The assistant message renders the use as a marker.
        assert!(parsed.messages[0].content.contains("[工具调用: Bash]"));
    }

    #[test]
    fn only_the_tail_is_examined() {
        let mut raw = String::new();
        for i in 0..100 {
            raw.push_str(&format!(
                "{{\"type\":\"user\",\"message\":{{\"content\":\"m{i}\"}}}}\n"
            ));
        }
        let parsed = TranscriptParser::new(10).parse_jsonl_str(&raw);
        assert_eq!(parsed.messages.len(), 10);
        assert_eq!(parsed.messages[0].content, "m90");
    }

    #[test]
    fn unknown_event_types_are_ignored() {
        let raw = concat!(
            r#"{"type":"file-history-snapshot","messageId":"x"}"#,
            "\n",
            r#"{"type":"user","message":{"content":"hello"}}"#,
            "\n",
        );
        let parsed = parser().parse_jsonl_str(raw);
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(parsed.skipped_lines, 0);
    }

    #[test]
    fn text_format_splits_on_anchors() {
        let text = "Human: first question\nwith a second line\nAssistant: the answer\nHuman: next";
        let parsed = parser().parse_text(text);
        assert_eq!(parsed.messages.len(), 3);
        assert_eq!(parsed.messages[0].role, "user");
        assert_eq!(parsed.messages[0].content, "first question\nwith a second line");
        assert_eq!(parsed.messages[1].role, "assistant");
        assert_eq!(parsed.messages[1].content, "the answer");
        assert_eq!(parsed.messages[2].content, "next");
    }

    #[test]
    fn text_without_anchors_yields_nothing() {
        let parsed = parser().parse_text("just some text\nno anchors here");
        assert!(parsed.messages.is_empty());
    }

    #[test]
    fn submit_hook_messages_are_flagged() {
        let raw = format!(
            "{{\"type\":\"user\",\"message\":{{\"content\":\"{} injected\"}}}}\n",
            SUBMIT_HOOK_TAG
        );
        let parsed = parser().parse_jsonl_str(&raw);
        assert!(parsed.messages[0].is_submit_hook());
    }
}
