//! Session-level reconciliation of hook records.
//!
//! Transforms the per-call-id files for one session into a
//! chronologically ordered tool-call chain plus a statistics block,
//! and scores how complete the captured data is against what the
//! transcript claims happened.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use sage_domain::turn::{ToolCall, ToolStatus};

use crate::state::HookStateStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationStats {
    pub total_tools: usize,
    pub successful_tools: usize,
    pub failed_tools: usize,
    pub pending_tools: usize,
    pub tool_types: BTreeMap<String, usize>,
    pub total_execution_time_ms: u64,
}

/// The aggregated chain handed to the stop hook, with a
/// data-completeness score in [0, 1].
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedToolData {
    pub tool_calls: Vec<ToolCall>,
    pub stats: AggregationStats,
    pub completeness: f64,
}

/// One session seen in the state directory recently.
#[derive(Debug, Clone, Serialize)]
pub struct SessionActivity {
    pub session_id: String,
    pub projects: Vec<String>,
    pub tool_count: usize,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_cross_project: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Aggregator {
    store: HookStateStore,
}

impl Aggregator {
    pub fn new(store: HookStateStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &HookStateStore {
        &self.store
    }

    /// The tool-call chain for one session, ordered by pre-event
    /// timestamp. Records from other projects are dropped when a
    /// project filter is supplied.
    pub fn aggregate_session(
        &self,
        session_id: &str,
        project_id: Option<&str>,
    ) -> (Vec<ToolCall>, AggregationStats) {
        let mut stats = AggregationStats::default();
        let mut calls = Vec::new();

        for record in self.store.list_by_session(session_id) {
            if let (Some(filter), Some(pre)) = (project_id, record.pre_call.as_ref()) {
                if pre.project_id != filter {
                    continue;
                }
            }
            let Some(call) = record.to_tool_call() else {
                continue;
            };

            stats.total_tools += 1;
            *stats.tool_types.entry(call.tool_name.clone()).or_default() += 1;
            match call.status {
                ToolStatus::Success => stats.successful_tools += 1,
                ToolStatus::Error => stats.failed_tools += 1,
                ToolStatus::Pending => stats.pending_tools += 1,
            }
            stats.total_execution_time_ms += call.execution_time_ms.unwrap_or(0);

            calls.push(call);
        }

        tracing::debug!(
            session_id,
            tools = stats.total_tools,
            pending = stats.pending_tools,
            "aggregated session tool calls"
        );
        (calls, stats)
    }

    /// Aggregate and score against the transcript's view.
    ///
    /// `expected` is the number of tool uses the transcript itself
    /// observed; `captured` is what the hook files actually hold.
    pub fn enhance_stop_hook_data(
        &self,
        session_id: &str,
        project_id: Option<&str>,
        expected_tool_uses: usize,
    ) -> EnhancedToolData {
        let (tool_calls, stats) = self.aggregate_session(session_id, project_id);
        let completeness = completeness_score(expected_tool_uses, &tool_calls);

        tracing::info!(
            session_id,
            captured = tool_calls.len(),
            expected = expected_tool_uses,
            completeness = format!("{completeness:.2}"),
            "stop-hook data enhanced"
        );

        EnhancedToolData {
            tool_calls,
            stats,
            completeness,
        }
    }

    /// Delete the files backing already-persisted tool calls.
    pub fn cleanup_processed(&self, tool_calls: &[ToolCall]) -> usize {
        let ids: Vec<String> = tool_calls.iter().map(|tc| tc.call_id.clone()).collect();
        self.store.delete_many(&ids)
    }

    /// Evict records older than `age` (default policy: 48 h).
    pub fn cleanup_old(&self, age: Duration) -> usize {
        self.store.evict_older_than(age)
    }

    /// Sessions active in the state directory within the window,
    /// with their project distribution.
    pub fn list_cross_project_sessions(&self, within: chrono::Duration) -> Vec<SessionActivity> {
        let cutoff = Utc::now() - within;
        let mut sessions: HashMap<String, SessionActivity> = HashMap::new();

        for record in self.store.all_records() {
            let Some(pre) = record.pre_call.as_ref() else {
                continue;
            };
            if pre.timestamp < cutoff {
                continue;
            }
            let entry = sessions
                .entry(pre.session_id.clone())
                .or_insert_with(|| SessionActivity {
                    session_id: pre.session_id.clone(),
                    projects: Vec::new(),
                    tool_count: 0,
                    first_seen: pre.timestamp,
                    last_seen: pre.timestamp,
                    is_cross_project: false,
                });
            if !entry.projects.contains(&pre.project_id) {
                entry.projects.push(pre.project_id.clone());
            }
            entry.tool_count += 1;
            entry.first_seen = entry.first_seen.min(pre.timestamp);
            entry.last_seen = entry.last_seen.max(pre.timestamp);
        }

        let mut result: Vec<SessionActivity> = sessions
            .into_values()
            .map(|mut s| {
                s.is_cross_project = s.projects.len() > 1;
                s
            })
            .collect();
        result.sort_by_key(|s| std::cmp::Reverse(s.last_seen));
        result
    }

    /// Detailed report for one session: summary, per-tool breakdown
    /// and a timeline.
    pub fn session_report(&self, session_id: &str) -> Value {
        let (calls, stats) = self.aggregate_session(session_id, None);
        let success_rate = if stats.total_tools > 0 {
            stats.successful_tools as f64 / stats.total_tools as f64 * 100.0
        } else {
            0.0
        };

        let timeline: Vec<Value> = calls
            .iter()
            .map(|call| {
                serde_json::json!({
                    "timestamp": call.timestamp.to_rfc3339(),
                    "tool": call.tool_name,
                    "execution_time_ms": call.execution_time_ms,
                    "status": match call.status {
                        ToolStatus::Success => "success",
                        ToolStatus::Error => "error",
                        ToolStatus::Pending => "pending",
                    },
                })
            })
            .collect();

        serde_json::json!({
            "session_id": session_id,
            "generated_at": Utc::now().to_rfc3339(),
            "summary": {
                "total_tools": stats.total_tools,
                "success_rate": success_rate,
                "total_execution_time_ms": stats.total_execution_time_ms,
            },
            "tool_breakdown": stats.tool_types,
            "timeline": timeline,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Completeness scoring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// 0.7 · min(captured/expected, 1) + 0.3 · quality, where quality is
/// the fraction of captured calls carrying real input and output.
fn completeness_score(expected: usize, captured: &[ToolCall]) -> f64 {
    if expected == 0 && captured.is_empty() {
        return 1.0;
    }
    let capture_rate = if expected == 0 {
        1.0
    } else {
        (captured.len() as f64 / expected as f64).min(1.0)
    };

    let quality_rate = if captured.is_empty() {
        0.0
    } else {
        let good = captured
            .iter()
            .filter(|call| has_content(&call.tool_input) && has_content(&call.tool_output))
            .count();
        good as f64 / captured.len() as f64
    };

    capture_rate * 0.7 + quality_rate * 0.3
}

/// Whether a JSON value carries actual content, not just existence.
fn has_content(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
