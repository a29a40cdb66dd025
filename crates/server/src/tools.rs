//! The tool catalogue and argument validation.
//!
//! Validation failures are reported as `isError: true` tool results
//! with a descriptive message, never retried.

use serde::Deserialize;
use serde_json::Value;

// ── limits ─────────────────────────────────────────────────────────

pub const MAX_USER_PROMPT: usize = 10_000;
pub const MAX_ASSISTANT_RESPONSE: usize = 50_000;
pub const MAX_CONTEXT_QUERY: usize = 1_000;
pub const MAX_SEARCH_QUERY: usize = 500;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Catalogue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The `tools/list` payload.
pub fn tool_catalogue() -> Value {
    serde_json::json!({
        "tools": [
            {
                "name": "save_conversation",
                "description": "Persist one user↔assistant turn into long-term memory.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "user_prompt": {
                            "type": "string",
                            "maxLength": MAX_USER_PROMPT,
                            "description": "The user side of the turn (may be empty for tool-result turns)."
                        },
                        "assistant_response": {
                            "type": "string",
                            "maxLength": MAX_ASSISTANT_RESPONSE,
                            "description": "The assistant side of the turn."
                        },
                        "metadata": {
                            "type": "object",
                            "description": "Free-form metadata merged into the stored row."
                        }
                    },
                    "required": ["user_prompt", "assistant_response"]
                }
            },
            {
                "name": "get_context",
                "description": "Retrieve ranked, formatted context for a query.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "maxLength": MAX_CONTEXT_QUERY},
                        "max_results": {"type": "integer", "minimum": 1, "maximum": 50, "default": 10},
                        "enable_llm_summary": {"type": "boolean", "default": false},
                        "enable_neural_rerank": {"type": "boolean"},
                        "context_window": {"type": "integer", "minimum": 500, "maximum": 8000, "default": 2000}
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "search_memory",
                "description": "Plain vector-similarity search over stored memories.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "maxLength": MAX_SEARCH_QUERY},
                        "n": {"type": "integer", "minimum": 1, "maximum": 20, "default": 5},
                        "similarity_threshold": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.3}
                    },
                    "required": ["query"]
                }
            },
            {
                "name": "get_memory_stats",
                "description": "Aggregate statistics over the memory store.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "include_performance": {"type": "boolean", "default": false}
                    }
                }
            },
            {
                "name": "clear_session",
                "description": "Remove every memory belonging to one session.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "session_id": {"type": "string", "format": "uuid"}
                    },
                    "required": ["session_id"]
                }
            }
        ]
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SaveArgs {
    pub user_prompt: String,
    pub assistant_response: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl SaveArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.user_prompt.chars().count() > MAX_USER_PROMPT {
            return Err(format!("user_prompt exceeds {MAX_USER_PROMPT} characters"));
        }
        if self.assistant_response.chars().count() > MAX_ASSISTANT_RESPONSE {
            return Err(format!(
                "assistant_response exceeds {MAX_ASSISTANT_RESPONSE} characters"
            ));
        }
        if self.user_prompt.trim().is_empty() && self.assistant_response.trim().is_empty() {
            return Err("at least one of user_prompt and assistant_response must be non-empty".into());
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() && !metadata.is_null() {
                return Err("metadata must be a JSON object".into());
            }
        }
        Ok(())
    }
}

fn d_n() -> usize {
    5
}

/// Unset optional fields fall back to the configured retrieval
/// tuning (`SAGE_RETRIEVAL_COUNT`, `SAGE_MAX_CONTEXT_TOKENS`).
#[derive(Debug, Deserialize)]
pub struct ContextArgs {
    pub query: String,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub enable_llm_summary: bool,
    #[serde(default)]
    pub enable_neural_rerank: Option<bool>,
    #[serde(default)]
    pub context_window: Option<usize>,
}

impl ContextArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if self.query.chars().count() > MAX_CONTEXT_QUERY {
            return Err(format!("query exceeds {MAX_CONTEXT_QUERY} characters"));
        }
        if let Some(max_results) = self.max_results {
            if !(1..=50).contains(&max_results) {
                return Err("max_results must be within 1..=50".into());
            }
        }
        if let Some(window) = self.context_window {
            if !(500..=8000).contains(&window) {
                return Err("context_window must be within 500..=8000".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchArgs {
    pub query: String,
    #[serde(default = "d_n")]
    pub n: usize,
    /// Unset falls back to `SAGE_SIMILARITY_THRESHOLD`.
    #[serde(default)]
    pub similarity_threshold: Option<f64>,
}

impl SearchArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.query.trim().is_empty() {
            return Err("query must not be empty".into());
        }
        if self.query.chars().count() > MAX_SEARCH_QUERY {
            return Err(format!("query exceeds {MAX_SEARCH_QUERY} characters"));
        }
        if !(1..=20).contains(&self.n) {
            return Err("n must be within 1..=20".into());
        }
        if let Some(threshold) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("similarity_threshold must be within 0..=1".into());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsArgs {
    #[serde(default)]
    pub include_performance: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClearArgs {
    pub session_id: String,
}

impl ClearArgs {
    pub fn validate(&self) -> Result<(), String> {
        uuid::Uuid::parse_str(&self.session_id)
            .map(|_| ())
            .map_err(|_| format!("session_id is not a UUID: {}", self.session_id))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_lists_five_tools() {
        let catalogue = tool_catalogue();
        let tools = catalogue["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 5);
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"save_conversation"));
        assert!(names.contains(&"get_context"));
        assert!(names.contains(&"search_memory"));
        assert!(names.contains(&"get_memory_stats"));
        assert!(names.contains(&"clear_session"));
        for tool in tools {
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }

    #[test]
    fn save_args_reject_double_empty() {
        let args = SaveArgs {
            user_prompt: "  ".into(),
            assistant_response: "".into(),
            metadata: None,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn save_args_allow_one_sided() {
        let args = SaveArgs {
            user_prompt: "".into(),
            assistant_response: "Tool execution result: Success (exit=0)".into(),
            metadata: None,
        };
        assert!(args.validate().is_ok());
    }

    #[test]
    fn save_args_enforce_length_caps() {
        let args = SaveArgs {
            user_prompt: "x".repeat(MAX_USER_PROMPT + 1),
            assistant_response: "a".into(),
            metadata: None,
        };
        assert!(args.validate().is_err());
    }

    #[test]
    fn context_args_defaults_and_ranges() {
        let args: ContextArgs = serde_json::from_value(serde_json::json!({"query": "b-trees"})).unwrap();
        assert!(args.max_results.is_none());
        assert!(args.context_window.is_none());
        assert!(args.validate().is_ok());

        let bad: ContextArgs =
            serde_json::from_value(serde_json::json!({"query": "q", "max_results": 100})).unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn search_args_defaults_and_ranges() {
        let args: SearchArgs = serde_json::from_value(serde_json::json!({"query": "q"})).unwrap();
        assert_eq!(args.n, 5);
        assert!(args.similarity_threshold.is_none());
        assert!(args.validate().is_ok());

        let bad: SearchArgs =
            serde_json::from_value(serde_json::json!({"query": "q", "similarity_threshold": 1.5}))
                .unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn clear_args_require_uuid() {
        let bad = ClearArgs {
            session_id: "nope".into(),
        };
        assert!(bad.validate().is_err());

        let good = ClearArgs {
            session_id: "1c7cb813-5584-4c9c-9a14-3e3e1f1f2a61".into(),
        };
        assert!(good.validate().is_ok());
    }
}
