//! One round of user↔assistant interaction, including the tool calls
//! made while the assistant produced its response.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool calls
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Post event never arrived (tool still running or crashed).
    Pending,
    Success,
    Error,
}

/// One invocation of a tool inside a turn.
///
/// `call_id` is supplied by the host and is the join key between the
/// pre-tool and post-tool hook events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    #[serde(default)]
    pub tool_output: Value,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A complete conversation turn, immutable once persisted.
///
/// At least one of `user_prompt` / `assistant_response` is non-empty;
/// a turn may legitimately be assistant-only when the content is a
/// tool result or system note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: Uuid,
    pub session_id: String,
    pub turn_index: i32,
    pub timestamp: DateTime<Utc>,
    pub user_prompt: String,
    pub assistant_response: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Turn {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            turn_id: Uuid::new_v4(),
            session_id: session_id.into(),
            turn_index: 0,
            timestamp: Utc::now(),
            user_prompt: String::new(),
            assistant_response: String::new(),
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// A turn with both sides empty cannot be persisted.
    pub fn is_empty(&self) -> bool {
        self.user_prompt.is_empty() && self.assistant_response.is_empty()
    }

    pub fn has_tool_interactions(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// One-line human summary for tool responses and logs.
    pub fn summary(&self) -> String {
        let user = preview(&self.user_prompt, 100);
        let assistant = preview(&self.assistant_response, 100);
        if self.tool_calls.is_empty() {
            format!("user: {user} | assistant: {assistant}")
        } else {
            let tools: Vec<&str> = self
                .tool_calls
                .iter()
                .map(|tc| tc.tool_name.as_str())
                .collect();
            format!(
                "user: {user} | assistant: {assistant} | tools: {}",
                tools.join(", ")
            )
        }
    }
}

/// Markers that flag conversation content as code-bearing.
const CODE_INDICATORS: [&str; 10] = [
    "```", "def ", "class ", "import ", "function", "const ", "let ", "var ", "<?php", "<script",
];

/// Whether text looks like it carries code.
pub fn contains_code(text: &str) -> bool {
    CODE_INDICATORS.iter().any(|marker| text.contains(marker))
}

/// Truncate on a char boundary, appending an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
