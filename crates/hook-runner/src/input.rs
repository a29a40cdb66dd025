//! Wire shapes the host CLI writes onto a hook's stdin.

use serde::Deserialize;
use serde_json::Value;

/// The superset of fields across pre / post / stop events; each
/// subcommand reads the ones it needs.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    /// `"text"` marks a pre-parsed Human:/Assistant: payload.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl HookInput {
    /// Parse stdin: JSON when it is JSON, otherwise treat the whole
    /// payload as Human:/Assistant: text.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(input) = serde_json::from_str::<HookInput>(trimmed) {
            return Some(input);
        }
        Some(HookInput {
            format: Some("text".into()),
            content: Some(trimmed.to_owned()),
            ..Default::default()
        })
    }

    /// Whether the tool response looks like a failure.
    pub fn response_is_error(&self) -> bool {
        match &self.tool_response {
            Some(Value::Object(map)) => {
                map.get("is_error").and_then(Value::as_bool).unwrap_or(false)
                    || map.contains_key("error")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_input_parses() {
        let input = HookInput::from_raw(
            r#"{"session_id":"s1","tool_name":"Bash","tool_use_id":"t1","tool_input":{"command":"ls"}}"#,
        )
        .unwrap();
        assert_eq!(input.session_id, "s1");
        assert_eq!(input.tool_use_id.as_deref(), Some("t1"));
        assert!(input.format.is_none());
    }

    #[test]
    fn non_json_becomes_text_payload() {
        let input = HookInput::from_raw("Human: hi\nAssistant: hello").unwrap();
        assert_eq!(input.format.as_deref(), Some("text"));
        assert!(input.content.unwrap().starts_with("Human:"));
    }

    #[test]
    fn empty_stdin_is_none() {
        assert!(HookInput::from_raw("   ").is_none());
    }

    #[test]
    fn error_detection_in_tool_response() {
        let mut input = HookInput::default();
        input.tool_response = Some(serde_json::json!({"error": "boom"}));
        assert!(input.response_is_error());

        input.tool_response = Some(serde_json::json!({"is_error": true, "content": "x"}));
        assert!(input.response_is_error());

        input.tool_response = Some(serde_json::json!({"content": "fine"}));
        assert!(!input.response_is_error());

        input.tool_response = Some(serde_json::json!("plain output"));
        assert!(!input.response_is_error());
    }
}
