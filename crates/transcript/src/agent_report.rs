//! Structured agent-report detection.
//!
//! Sub-agents announce themselves in assistant messages using a few
//! documented shapes. The detector recognises them, pulls out the
//! embedded metadata, and scores how complete the report looks.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// `=== <type?> Report by @<name> ===`
    Standard,
    /// `Agent Report: <name>`
    Simple,
    /// Leading `@<name> ` mention.
    Mention,
    /// Loose patterns only; low confidence.
    Generic,
}

/// Boolean content features counted towards the completeness score.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ContentFeatures {
    pub has_execution_id: bool,
    pub has_metrics: bool,
    pub has_errors: bool,
    pub has_warnings: bool,
    pub has_success: bool,
    pub has_recommendations: bool,
}

impl ContentFeatures {
    fn completeness(&self) -> f64 {
        let present = [
            self.has_execution_id,
            self.has_metrics,
            self.has_errors,
            self.has_warnings,
            self.has_success,
            self.has_recommendations,
        ]
        .iter()
        .filter(|b| **b)
        .count();
        present as f64 / 6.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_name: String,
    pub report_type: String,
    pub format: ReportFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_metadata: Option<Value>,
    pub content_features: ContentFeatures,
    pub completeness_score: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compiles the recognition patterns once; construct at startup and
/// reuse.
pub struct AgentReportDetector {
    standard_en: Regex,
    standard_zh: Regex,
    simple: Regex,
    mention: Regex,
    task_id: Regex,
    execution_time: Regex,
    embedded: Regex,
    generic: Vec<Regex>,
    generic_name: Regex,
    feature_execution_id: Regex,
    feature_metrics: Regex,
    feature_errors: Regex,
    feature_warnings: Regex,
    feature_success: Regex,
    feature_recommendations: Regex,
}

impl Default for AgentReportDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentReportDetector {
    pub fn new() -> Self {
        let rx = |pattern: &str| Regex::new(pattern).expect("static pattern compiles");
        Self {
            standard_en: rx(r"(?i)===\s*(?:(.+?)\s+)?Report\s+by\s+@([\w-]+)\s*==="),
            standard_zh: rx(r"===\s*(.+?报告)\s+by\s+@([\w-]+)\s*==="),
            simple: rx(r"(?i)Agent Report:\s*(\w+)"),
            mention: rx(r"^@(\w+)\s+"),
            task_id: rx(r"(?i)(?:Task|执行|任务)\s*ID:\s*(\S+)"),
            execution_time: rx(
                r"(?i)(?:执行时间|Execution Time|Duration|耗时):\s*([0-9.]+)\s*(?:秒|s|ms|毫秒)",
            ),
            embedded: rx(r"(?s)<!--\s*AGENT_METADATA\s*(.*?)\s*-->"),
            generic: vec![
                rx(r"(?i)agent\s+report"),
                rx(r"(?i)@\w+\s+(?:report|summary|分析|报告)"),
                rx(r"(?:代理|Agent)\s*[:：]\s*\w+"),
                rx(r"(?i)by\s+@\w+"),
            ],
            generic_name: rx(r"(?i)(?:agent|代理|@)\s*[:\s]*(\w+)"),
            feature_execution_id: rx(r"(?i)执行ID|Execution ID|Task ID"),
            feature_metrics: rx(r"(?i)指标|Metrics|统计|Statistics"),
            feature_errors: rx(r"错误|Error|失败|Failed|❌"),
            feature_warnings: rx(r"警告|Warning|注意|⚠️"),
            feature_success: rx(r"成功|Success|完成|✅"),
            feature_recommendations: rx(r"(?i)建议|Recommend|Suggestion|下一步"),
        }
    }

    /// Detect a report in one assistant message. Returns `None` for
    /// ordinary content.
    pub fn detect(&self, content: &str) -> Option<AgentReport> {
        if content.is_empty() {
            return None;
        }

        let header = self.match_header(content);
        if let Some((report_type, agent_name, format)) = header {
            let features = self.features(content);
            let embedded_metadata = self.embedded_metadata(content);

            return Some(AgentReport {
                agent_name,
                report_type,
                format,
                task_id: self
                    .task_id
                    .captures(content)
                    .map(|c| c[1].trim_end_matches(['，', ',']).to_owned()),
                execution_time: self.execution_time.captures(content).map(|c| c[1].to_owned()),
                embedded_metadata,
                completeness_score: features.completeness(),
                content_features: features,
            });
        }

        // Loose fallback: only when one of the generic shapes shows
        // up, and with an explicit low-confidence marker.
        if self.generic.iter().any(|rx| rx.is_match(content)) {
            let agent_name = self
                .generic_name
                .captures(content)
                .map(|c| c[1].to_owned())
                .unwrap_or_else(|| "unknown".into());
            return Some(AgentReport {
                agent_name,
                report_type: "Inferred".into(),
                format: ReportFormat::Generic,
                task_id: None,
                execution_time: None,
                embedded_metadata: None,
                content_features: ContentFeatures::default(),
                completeness_score: 0.0,
            });
        }

        None
    }

    fn match_header(&self, content: &str) -> Option<(String, String, ReportFormat)> {
        if let Some(caps) = self
            .standard_en
            .captures(content)
            .or_else(|| self.standard_zh.captures(content))
        {
            let report_type = caps
                .get(1)
                .map(|m| m.as_str().to_owned())
                .unwrap_or_else(|| "General".into());
            return Some((report_type, caps[2].to_owned(), ReportFormat::Standard));
        }
        if let Some(caps) = self.simple.captures(content) {
            return Some(("General".into(), caps[1].to_owned(), ReportFormat::Simple));
        }
        if let Some(caps) = self.mention.captures(content.trim_start()) {
            return Some(("Direct".into(), caps[1].to_owned(), ReportFormat::Mention));
        }
        None
    }

    fn features(&self, content: &str) -> ContentFeatures {
        ContentFeatures {
            has_execution_id: self.feature_execution_id.is_match(content),
            has_metrics: self.feature_metrics.is_match(content),
            has_errors: self.feature_errors.is_match(content),
            has_warnings: self.feature_warnings.is_match(content),
            has_success: self.feature_success.is_match(content),
            has_recommendations: self.feature_recommendations.is_match(content),
        }
    }

    fn embedded_metadata(&self, content: &str) -> Option<Value> {
        let caps = self.embedded.captures(content)?;
        match serde_json::from_str(&caps[1]) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse embedded agent metadata");
                None
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
