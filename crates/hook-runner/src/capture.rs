//! Pre- and post-tool capture.
//!
//! Both run as short-lived processes and always exit 0: a failed
//! capture degrades a later aggregation, it never blocks the
//! assistant.

use std::path::Path;

use chrono::Utc;
use serde_json::Value;

use sage_domain::hook::{PostCall, PreCall};
use sage_domain::project;
use sage_hooks::HookStateStore;

use crate::input::HookInput;

/// Record the pre-tool event.
pub fn run_pre(input: HookInput, store: &HookStateStore) {
    let Some(call_id) = input.tool_use_id.clone().filter(|id| !id.is_empty()) else {
        tracing::warn!("pre event without tool_use_id, skipping capture");
        return;
    };

    let (project_id, project_name) = project_identity(input.cwd.as_deref());
    let pre = PreCall {
        session_id: input.session_id.clone(),
        tool_name: input.tool_name.clone().unwrap_or_else(|| "unknown".into()),
        tool_input: input.tool_input.clone().unwrap_or(Value::Null),
        timestamp: Utc::now(),
        project_id,
        project_name,
    };

    match store.record_pre(&call_id, pre) {
        Ok(()) => tracing::debug!(call_id = %call_id, "pre event recorded"),
        Err(e) => tracing::error!(call_id = %call_id, error = %e, "pre capture failed"),
    }
}

/// Record the post-tool event, deriving the execution time from the
/// pre timestamp when the host did not supply one.
pub fn run_post(input: HookInput, store: &HookStateStore) {
    let Some(call_id) = input.tool_use_id.clone().filter(|id| !id.is_empty()) else {
        tracing::warn!("post event without tool_use_id, skipping capture");
        return;
    };

    let now = Utc::now();
    let execution_time_ms = input.execution_time_ms.or_else(|| {
        let record = store.read(&call_id).ok().flatten()?;
        let pre = record.pre_call?;
        u64::try_from((now - pre.timestamp).num_milliseconds().max(0)).ok()
    });

    let is_error = input.response_is_error();
    let error_message = if is_error {
        input
            .tool_response
            .as_ref()
            .and_then(|r| r.get("error"))
            .and_then(Value::as_str)
            .map(str::to_owned)
            .or_else(|| Some("tool reported an error".into()))
    } else {
        None
    };

    let post = PostCall {
        tool_output: input.tool_response.clone().unwrap_or(Value::Null),
        execution_time_ms,
        is_error,
        error_message,
        timestamp: now,
    };

    match store.record_post(&call_id, post) {
        Ok(()) => tracing::debug!(call_id = %call_id, "post event recorded"),
        Err(e) => tracing::error!(call_id = %call_id, error = %e, "post capture failed"),
    }
}

pub fn project_identity(cwd: Option<&str>) -> (String, String) {
    match cwd {
        Some(cwd) => {
            let path = Path::new(cwd);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "unknown".into());
            (project::project_id_for(path), name)
        }
        None => (project::current_project_id(), project::current_project_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, HookStateStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = HookStateStore::open(Some(tmp.path().to_path_buf())).unwrap();
        (tmp, store)
    }

    fn pre_input(call_id: &str) -> HookInput {
        HookInput::from_raw(&format!(
            r#"{{"session_id":"s1","tool_name":"Bash","tool_use_id":"{call_id}","tool_input":{{"command":"ls"}},"cwd":"/tmp/demo"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn pre_then_post_builds_a_complete_record() {
        let (_tmp, store) = store();
        run_pre(pre_input("t1"), &store);

        let post = HookInput::from_raw(
            r#"{"session_id":"s1","tool_use_id":"t1","tool_response":{"content":"ok"}}"#,
        )
        .unwrap();
        run_post(post, &store);

        let record = store.read("t1").unwrap().unwrap();
        assert!(record.is_complete());
        let post_call = record.post_call.unwrap();
        assert!(!post_call.is_error);
        // Derived from the pre timestamp.
        assert!(post_call.execution_time_ms.is_some());
    }

    #[test]
    fn error_responses_carry_a_message() {
        let (_tmp, store) = store();
        run_pre(pre_input("t2"), &store);

        let post = HookInput::from_raw(
            r#"{"session_id":"s1","tool_use_id":"t2","tool_response":{"error":"exit status 1"}}"#,
        )
        .unwrap();
        run_post(post, &store);

        let record = store.read("t2").unwrap().unwrap();
        let post_call = record.post_call.unwrap();
        assert!(post_call.is_error);
        assert_eq!(post_call.error_message.as_deref(), Some("exit status 1"));
    }

    #[test]
    fn missing_call_id_is_a_noop() {
        let (tmp, store) = store();
        run_pre(
            HookInput::from_raw(r#"{"session_id":"s1","tool_name":"Bash"}"#).unwrap(),
            &store,
        );
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn project_identity_from_cwd() {
        let (id, name) = project_identity(Some("/home/alice/demo"));
        assert_eq!(name, "demo");
        assert_eq!(id.len(), 12);
    }
}
