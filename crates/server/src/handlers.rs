//! Method dispatch and the error-translation boundary.
//!
//! Every tool call runs under the configured wall-clock timeout.
//! Validation failures come back as `isError: true` without retry;
//! internal errors are translated into short user-facing messages
//! tagged with their kind, never backtraces.

use std::time::Duration;

use serde_json::Value;

use sage_domain::error::Error;

use crate::rpc::{
    initialize_result, tool_result, JsonRpcRequest, JsonRpcResponse, INTERNAL_ERROR,
    INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::service::ServiceContainer;
use crate::tools::{tool_catalogue, ClearArgs, ContextArgs, SaveArgs, SearchArgs, StatsArgs};

/// Handle one request. Notifications produce no response.
pub async fn handle_request(
    container: &ServiceContainer,
    req: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    if req.is_notification() {
        // `notifications/initialized` and friends: accept silently.
        tracing::debug!(method = %req.method, "notification received");
        return None;
    }
    let id = req.id.clone().unwrap_or(Value::Null);

    if req.jsonrpc != "2.0" {
        return Some(JsonRpcResponse::error(
            id,
            INVALID_REQUEST,
            "jsonrpc must be \"2.0\"",
        ));
    }

    let response = match req.method.as_str() {
        "initialize" => JsonRpcResponse::success(id, initialize_result()),
        "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
        "tools/list" => JsonRpcResponse::success(id, tool_catalogue()),
        "tools/call" => {
            let params = req.params.unwrap_or(Value::Null);
            let name = params.get("name").and_then(Value::as_str);
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            match name {
                Some(name) => {
                    let result = call_tool(container, name, arguments).await;
                    match result {
                        Ok(value) => JsonRpcResponse::success(id, value),
                        Err(code_message) => {
                            JsonRpcResponse::error(id, code_message.0, code_message.1)
                        }
                    }
                }
                None => JsonRpcResponse::error(id, INVALID_PARAMS, "missing tool name"),
            }
        }
        other => JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown method: {other}")),
    };

    Some(response)
}

/// Dispatch one tool call under the wall-clock timeout.
///
/// `Err` means a protocol-level failure (unknown tool, unparseable
/// arguments). Everything else — including handler errors — comes
/// back as `Ok` with a tool result, possibly `isError: true`.
async fn call_tool(
    container: &ServiceContainer,
    name: &str,
    arguments: Value,
) -> std::result::Result<Value, (i64, String)> {
    let timeout = Duration::from_secs(container.config().server.tool_timeout_secs);

    let work = dispatch_tool(container, name, arguments);
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(tool = name, timeout_secs = timeout.as_secs(), "tool call timed out");
            Ok(tool_result(
                format!(
                    "error [timeout]: {name} exceeded the {}s limit; in-flight work was cancelled",
                    timeout.as_secs()
                ),
                true,
            ))
        }
    }
}

async fn dispatch_tool(
    container: &ServiceContainer,
    name: &str,
    arguments: Value,
) -> std::result::Result<Value, (i64, String)> {
    const TOOL_NAMES: [&str; 5] = [
        "save_conversation",
        "get_context",
        "search_memory",
        "get_memory_stats",
        "clear_session",
    ];
    if !TOOL_NAMES.contains(&name) {
        return Err((INVALID_PARAMS, format!("unknown tool: {name}")));
    }

    let service = match container.get().await {
        Ok(service) => service,
        Err(e) => return Ok(tool_error(&e)),
    };

    match name {
        "save_conversation" => {
            let args: SaveArgs = parse_args(arguments)?;
            if let Err(message) = args.validate() {
                return Ok(validation_error(message));
            }
            match service
                .save_conversation(&args.user_prompt, &args.assistant_response, args.metadata)
                .await
            {
                Ok(outcome) => Ok(tool_result(
                    format!(
                        "✅ Conversation saved\nSession: {}\nTurn: {}\nMemory: {}\n{}",
                        outcome.session_id, outcome.turn_id, outcome.memory_id, outcome.summary
                    ),
                    false,
                )),
                Err(e) => Ok(tool_error(&e)),
            }
        }
        "get_context" => {
            let args: ContextArgs = parse_args(arguments)?;
            if let Err(message) = args.validate() {
                return Ok(validation_error(message));
            }
            match service.get_context(&args).await {
                Ok(payload) => {
                    let context = payload["context"].as_str().unwrap_or_default().to_owned();
                    let metadata = serde_json::json!({
                        "num_results": payload["num_results"],
                        "strategy_used": payload["strategy_used"],
                        "llm_summary_used": payload["llm_summary_used"],
                    });
                    Ok(serde_json::json!({
                        "content": [
                            {"type": "text", "text": context},
                            {"type": "text", "text": metadata.to_string()},
                        ]
                    }))
                }
                Err(e) => Ok(tool_error(&e)),
            }
        }
        "search_memory" => {
            let args: SearchArgs = parse_args(arguments)?;
            if let Err(message) = args.validate() {
                return Ok(validation_error(message));
            }
            match service.search_memory(&args).await {
                Ok(hits) => {
                    let text = serde_json::to_string_pretty(&hits)
                        .unwrap_or_else(|_| "[]".into());
                    Ok(tool_result(text, false))
                }
                Err(e) => Ok(tool_error(&e)),
            }
        }
        "get_memory_stats" => {
            let args: StatsArgs = parse_args(arguments)?;
            match service.get_memory_stats(args.include_performance).await {
                Ok(stats) => Ok(tool_result(
                    serde_json::to_string_pretty(&stats).unwrap_or_else(|_| "{}".into()),
                    false,
                )),
                Err(e) => Ok(tool_error(&e)),
            }
        }
        "clear_session" => {
            let args: ClearArgs = parse_args(arguments)?;
            if let Err(message) = args.validate() {
                return Ok(validation_error(message));
            }
            match service.clear_session(&args.session_id).await {
                Ok(deleted) => Ok(tool_result(
                    format!("Cleared {deleted} memories from session {}", args.session_id),
                    false,
                )),
                Err(e) => Ok(tool_error(&e)),
            }
        }
        _ => unreachable!("tool name checked above"),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Value,
) -> std::result::Result<T, (i64, String)> {
    serde_json::from_value(arguments)
        .map_err(|e| (INVALID_PARAMS, format!("invalid arguments: {e}")))
}

fn validation_error(message: String) -> Value {
    tool_result(format!("error [input_invalid]: {message}"), true)
}

/// One `text` item explaining the failure in user terms, tagged with
/// the error kind.
fn tool_error(e: &Error) -> Value {
    tracing::error!(kind = e.kind(), error = %e, "tool call failed");

    let detail = match e {
        Error::Provider { kind, .. } => {
            format!("error [{kind}]: the remote provider is unavailable; the turn was backed up locally if it was a save")
        }
        Error::StorageTransient(_) => {
            "error [storage_transient]: the database is temporarily unavailable; saved data was backed up locally".into()
        }
        Error::StorageFatal(_) => {
            "error [storage_fatal]: the database rejected the operation; saved data was backed up locally".into()
        }
        Error::InvalidInput(message) => format!("error [input_invalid]: {message}"),
        Error::Config(message) => format!("error [config_missing]: {message}"),
        Error::Cancelled(message) => format!("error [timeout]: {message}"),
        other => format!("error [{}]: {other}", other.kind()),
    };
    tool_result(detail, true)
}

/// The `INTERNAL_ERROR` code is used by transports when a handler
/// panics; exposed for them.
pub const HANDLER_PANIC_CODE: i64 = INTERNAL_ERROR;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
