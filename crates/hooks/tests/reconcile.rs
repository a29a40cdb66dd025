//! End-to-end reconciliation through the shared state directory:
//! pre events, post events arriving out of order, aggregation,
//! cleanup and eviction.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use sage_domain::hook::{PostCall, PreCall};
use sage_domain::turn::ToolStatus;
use sage_hooks::{Aggregator, HookStateStore};

fn pre(session: &str, tool: &str, project: &str, secs: i64) -> PreCall {
    PreCall {
        session_id: session.into(),
        tool_name: tool.into(),
        tool_input: json!({"command": "ls"}),
        timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        project_id: project.into(),
        project_name: "proj".into(),
    }
}

fn post(secs: i64) -> PostCall {
    PostCall {
        tool_output: json!("ok"),
        execution_time_ms: Some(25),
        is_error: false,
        error_message: None,
        timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
    }
}

fn store() -> (tempfile::TempDir, HookStateStore) {
    let tmp = tempfile::tempdir().unwrap();
    let store = HookStateStore::open(Some(tmp.path().to_path_buf())).unwrap();
    (tmp, store)
}

#[test]
fn pre_then_post_yields_one_complete_record() {
    let (_tmp, store) = store();

    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    store.record_post("c1", post(1)).unwrap();

    let records = store.list_by_session("s1");
    assert_eq!(records.len(), 1);
    assert!(records[0].is_complete());
}

#[test]
fn posts_arriving_in_reverse_order_keep_pre_ordering() {
    let (_tmp, store) = store();

    store.record_pre("c1", pre("s1", "Read", "p1", 0)).unwrap();
    store.record_pre("c2", pre("s1", "Bash", "p1", 10)).unwrap();
    // Post events arrive in reverse.
    store.record_post("c2", post(12)).unwrap();
    store.record_post("c1", post(14)).unwrap();

    let aggregator = Aggregator::new(store);
    let (calls, stats) = aggregator.aggregate_session("s1", Some("p1"));

    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].call_id, "c1");
    assert_eq!(calls[1].call_id, "c2");
    assert!(calls.iter().all(|c| c.status == ToolStatus::Success));
    assert_eq!(stats.successful_tools, 2);
    assert_eq!(stats.total_execution_time_ms, 50);
}

#[test]
fn project_filter_drops_foreign_records() {
    let (_tmp, store) = store();

    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    store.record_pre("c2", pre("s1", "Bash", "p2", 1)).unwrap();

    let aggregator = Aggregator::new(store);
    let (calls, _) = aggregator.aggregate_session("s1", Some("p1"));
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].call_id, "c1");

    let (unfiltered, _) = aggregator.aggregate_session("s1", None);
    assert_eq!(unfiltered.len(), 2);
}

#[test]
fn missing_post_becomes_pending_not_error() {
    let (_tmp, store) = store();
    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();

    let aggregator = Aggregator::new(store);
    let (calls, stats) = aggregator.aggregate_session("s1", None);

    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].status, ToolStatus::Pending);
    assert!(calls[0].tool_output.is_null());
    assert_eq!(stats.pending_tools, 1);
}

#[test]
fn post_for_lost_pre_still_creates_a_record() {
    let (_tmp, store) = store();
    store.record_post("c9", post(0)).unwrap();

    let record = store.read("c9").unwrap().unwrap();
    assert!(record.pre_call.is_none());
    assert!(record.post_call.is_some());

    // Without a pre event it cannot be attributed to a session.
    assert!(store.list_by_session("s1").is_empty());
}

#[test]
fn cleanup_processed_removes_consumed_files() {
    let (tmp, store) = store();
    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    store.record_post("c1", post(1)).unwrap();

    let aggregator = Aggregator::new(store);
    let (calls, _) = aggregator.aggregate_session("s1", None);
    assert_eq!(aggregator.cleanup_processed(&calls), 1);
    assert!(!tmp.path().join("complete_c1.json").exists());
}

#[test]
fn eviction_sweeps_aged_files() {
    let (tmp, store) = store();
    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    std::fs::write(tmp.path().join("pre_c2.json"), "{}").unwrap();
    std::fs::write(tmp.path().join("unrelated.txt"), "keep me").unwrap();

    // Age zero: everything written before "now" qualifies.
    let removed = store.evict_older_than(Duration::from_secs(0));
    assert_eq!(removed, 2);
    assert!(tmp.path().join("unrelated.txt").exists());
}

#[test]
fn completeness_blends_capture_and_quality() {
    let (_tmp, store) = store();
    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    store.record_post("c1", post(1)).unwrap();

    let aggregator = Aggregator::new(store);
    // Transcript saw two tool uses, hooks captured one good one.
    let enhanced = aggregator.enhance_stop_hook_data("s1", None, 2);
    assert_eq!(enhanced.tool_calls.len(), 1);
    assert!((enhanced.completeness - 0.65).abs() < 1e-9);
}

#[test]
fn session_report_summarises_the_timeline() {
    let (_tmp, store) = store();
    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    store.record_post("c1", post(2)).unwrap();
    store.record_pre("c2", pre("s1", "Read", "p1", 5)).unwrap();

    let aggregator = Aggregator::new(store);
    let report = aggregator.session_report("s1");

    assert_eq!(report["summary"]["total_tools"], 2);
    assert_eq!(report["summary"]["success_rate"], 50.0);
    assert_eq!(report["tool_breakdown"]["Bash"], 1);
    let timeline = report["timeline"].as_array().unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0]["tool"], "Bash");
    assert_eq!(timeline[1]["status"], "pending");
}

#[test]
fn cross_project_listing_flags_multi_project_sessions() {
    let (_tmp, store) = store();
    store.record_pre("c1", pre("s1", "Bash", "p1", 0)).unwrap();
    store.record_pre("c2", pre("s1", "Read", "p2", 5)).unwrap();
    store.record_pre("c3", pre("s2", "Bash", "p1", 9)).unwrap();

    let aggregator = Aggregator::new(store);
    let sessions = aggregator.list_cross_project_sessions(chrono::Duration::days(36_500));

    let s1 = sessions.iter().find(|s| s.session_id == "s1").unwrap();
    assert!(s1.is_cross_project);
    assert_eq!(s1.tool_count, 2);

    let s2 = sessions.iter().find(|s| s.session_id == "s2").unwrap();
    assert!(!s2.is_cross_project);
}
