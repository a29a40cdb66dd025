//! Hook-record types: the on-disk merge target for one tool
//! invocation, written by the pre/post hook processes and consumed by
//! the stop hook.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::turn::{ToolCall, ToolStatus};

/// Fields captured by the pre-tool hook, before the tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCall {
    pub session_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub project_name: String,
}

/// Fields captured by the post-tool hook, after the tool returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCall {
    #[serde(default)]
    pub tool_output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// One tool invocation as recorded on disk, keyed by call id.
///
/// A record with only `pre_call` populated is valid: the tool may
/// still be running, or its process crashed before the post event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookRecord {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_call: Option<PreCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_call: Option<PostCall>,
}

impl HookRecord {
    pub fn is_complete(&self) -> bool {
        self.pre_call.is_some() && self.post_call.is_some()
    }

    /// Convert into the turn-level representation. Records without a
    /// post event become pending calls with a null output.
    pub fn to_tool_call(&self) -> Option<ToolCall> {
        let pre = self.pre_call.as_ref()?;
        let (output, status, error_message, execution_time_ms, timestamp) =
            match &self.post_call {
                Some(post) => (
                    post.tool_output.clone(),
                    if post.is_error {
                        ToolStatus::Error
                    } else {
                        ToolStatus::Success
                    },
                    post.error_message.clone(),
                    post.execution_time_ms,
                    pre.timestamp,
                ),
                None => (Value::Null, ToolStatus::Pending, None, None, pre.timestamp),
            };

        Some(ToolCall {
            call_id: self.call_id.clone(),
            tool_name: pre.tool_name.clone(),
            tool_input: pre.tool_input.clone(),
            tool_output: output,
            status,
            error_message,
            execution_time_ms,
            timestamp,
        })
    }
}
