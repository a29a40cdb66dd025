//! Query analysis: type classification, technical keyword
//! extraction, emotional tone and urgency.
//!
//! Everything here is keyword matching over bilingual (English +
//! Chinese) lists; no model call is involved.

use regex::Regex;

use sage_domain::query::{EmotionalTone, QueryContext, QueryType, SessionHistoryEntry};

// ── classification keyword lists ───────────────────────────────────
// Ordered: the first matching category wins.

const DIAGNOSTIC: &[&str] = &[
    "错误", "error", "bug", "不工作", "失败", "问题", "报错", "keyerror", "exception",
];
const TECHNICAL: &[&str] = &[
    "代码", "code", "函数", "function", "class", "实现", "implement", "开发",
];
const PROCEDURAL: &[&str] = &["如何", "how to", "步骤", "step", "方法", "method", "一步步"];
const CONCEPTUAL: &[&str] = &["是什么", "what is", "解释", "explain", "原理", "principle"];
const CONVERSATIONAL: &[&str] = &["继续", "continue", "然后", "then", "接下来"];

// ── technical term lexicon ─────────────────────────────────────────

const LEXICON: &[(&str, &[&str])] = &[
    (
        "programming",
        &[
            "函数", "function", "class", "类", "方法", "method", "变量", "variable", "api",
            "algorithm", "算法", "bug", "debug", "调试", "error", "错误",
        ],
    ),
    (
        "database",
        &[
            "数据库", "database", "sql", "query", "查询", "table", "表", "index", "索引",
        ],
    ),
    (
        "system",
        &[
            "系统", "system", "架构", "architecture", "性能", "performance", "优化",
            "optimization",
        ],
    ),
    (
        "network",
        &[
            "网络", "network", "http", "api", "接口", "interface", "协议", "protocol",
        ],
    ),
    (
        "data",
        &[
            "数据", "data", "分析", "analysis", "统计", "statistics", "模型", "model",
        ],
    ),
];

// ── emotion / intent / urgency lists ───────────────────────────────

const EMOTIONS: &[(EmotionalTone, &[&str])] = &[
    (
        EmotionalTone::Urgent,
        &["紧急", "urgent", "急", "立即", "immediately", "马上", "asap"],
    ),
    (
        EmotionalTone::Confused,
        &[
            "不懂",
            "confused",
            "困惑",
            "不理解",
            "don't understand",
            "搞不清楚",
        ],
    ),
    (
        EmotionalTone::Frustrated,
        &["烦躁", "frustrated", "头疼", "麻烦", "trouble", "问题"],
    ),
    (
        EmotionalTone::Curious,
        &["好奇", "curious", "想知道", "wonder", "了解", "学习", "learn"],
    ),
];

const INTENTS: &[(&str, &[&str])] = &[
    (
        "implementation",
        &["如何实现", "how to implement", "怎么做", "实现方法", "代码示例"],
    ),
    (
        "explanation",
        &["是什么", "what is", "解释", "explain", "原理", "principle"],
    ),
    (
        "troubleshooting",
        &["不工作", "not working", "错误", "error", "失败", "failed", "问题"],
    ),
    (
        "comparison",
        &["比较", "compare", "区别", "difference", "选择", "choose", "vs"],
    ),
    (
        "optimization",
        &["优化", "optimize", "改进", "improve", "提升", "enhance", "性能"],
    ),
];

const URGENT_KEYWORDS: &[&str] = &["紧急", "urgent", "立即", "critical", "严重", "severe"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analyzer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SemanticAnalyzer {
    camel_case: Regex,
    snake_case: Regex,
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self {
            camel_case: Regex::new(r"\b[a-zA-Z_][a-zA-Z0-9_]*[A-Z][a-zA-Z0-9_]*\b")
                .expect("static pattern compiles"),
            snake_case: Regex::new(r"\b[a-z_]+_[a-z_]+\b").expect("static pattern compiles"),
        }
    }

    /// Build a [`QueryContext`] from the raw query and the recent
    /// session history.
    pub fn analyze(&self, query: &str, session_history: Vec<SessionHistoryEntry>) -> QueryContext {
        let lower = query.to_lowercase();

        let query_type = classify(&lower);
        let technical_keywords = self.extract_keywords(query, &lower);
        let emotional_tone = emotion(&lower);
        let user_intent = intent(&lower);
        let urgency_level = urgency(&lower, emotional_tone);

        tracing::debug!(
            query_type = query_type.as_str(),
            intent = ?user_intent,
            urgency = urgency_level,
            keywords = technical_keywords.len(),
            "query analysed"
        );

        QueryContext {
            query: query.to_owned(),
            query_type,
            technical_keywords,
            user_intent,
            emotional_tone,
            urgency_level,
            session_history,
        }
    }

    /// camelCase and snake_case identifiers plus lexicon hits, as a
    /// sorted, deduplicated list.
    fn extract_keywords(&self, query: &str, lower: &str) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();

        for (_category, terms) in LEXICON {
            for term in *terms {
                if lower.contains(term) {
                    keywords.push((*term).to_owned());
                }
            }
        }
        for m in self.camel_case.find_iter(query) {
            keywords.push(m.as_str().to_owned());
        }
        for m in self.snake_case.find_iter(query) {
            keywords.push(m.as_str().to_owned());
        }

        keywords.sort();
        keywords.dedup();
        keywords
    }
}

fn classify(lower: &str) -> QueryType {
    let hit = |list: &[&str]| list.iter().any(|kw| lower.contains(kw));

    if hit(DIAGNOSTIC) {
        QueryType::Diagnostic
    } else if hit(TECHNICAL) {
        QueryType::Technical
    } else if hit(PROCEDURAL) {
        QueryType::Procedural
    } else if hit(CONCEPTUAL) {
        QueryType::Conceptual
    } else if hit(CONVERSATIONAL) {
        QueryType::Conversational
    } else {
        QueryType::Conceptual
    }
}

fn emotion(lower: &str) -> EmotionalTone {
    for (tone, keywords) in EMOTIONS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *tone;
        }
    }
    EmotionalTone::Neutral
}

fn intent(lower: &str) -> Option<String> {
    for (name, keywords) in INTENTS {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return Some((*name).to_owned());
        }
    }
    None
}

/// Baseline from the emotional tone, overridden upward by explicit
/// urgency keywords, clamped to 1..=5.
fn urgency(lower: &str, tone: EmotionalTone) -> u8 {
    let mut level: u8 = match tone {
        EmotionalTone::Urgent => 5,
        EmotionalTone::Frustrated => 4,
        EmotionalTone::Confused => 3,
        _ => 1,
    };
    if URGENT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        level = level.max(4);
    }
    level.min(5)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(query: &str) -> QueryContext {
        SemanticAnalyzer::new().analyze(query, Vec::new())
    }

    #[test]
    fn diagnostic_beats_technical() {
        // "code" alone is technical, but the error wording wins.
        let ctx = analyze("my code throws an error");
        assert_eq!(ctx.query_type, QueryType::Diagnostic);
    }

    #[test]
    fn classification_order_is_respected() {
        assert_eq!(analyze("implement a parser").query_type, QueryType::Technical);
        assert_eq!(analyze("how to deploy step by step").query_type, QueryType::Procedural);
        assert_eq!(analyze("what is a monad").query_type, QueryType::Conceptual);
        assert_eq!(analyze("continue from there").query_type, QueryType::Conversational);
        // No signal defaults to conceptual.
        assert_eq!(analyze("hello world there").query_type, QueryType::Conceptual);
    }

    #[test]
    fn chinese_queries_classify_too() {
        assert_eq!(analyze("这个报错怎么回事").query_type, QueryType::Diagnostic);
        assert_eq!(analyze("如何配置数据库").query_type, QueryType::Procedural);
        assert_eq!(analyze("解释一下这个原理").query_type, QueryType::Conceptual);
    }

    #[test]
    fn identifiers_are_extracted() {
        let ctx = analyze("why does getUserName differ from get_user_id");
        assert!(ctx.technical_keywords.contains(&"getUserName".to_owned()));
        assert!(ctx.technical_keywords.contains(&"get_user_id".to_owned()));
    }

    #[test]
    fn lexicon_terms_are_extracted() {
        let ctx = analyze("optimize the database index");
        assert!(ctx.technical_keywords.contains(&"database".to_owned()));
        assert!(ctx.technical_keywords.contains(&"index".to_owned()));
    }

    #[test]
    fn keywords_are_deduplicated() {
        let ctx = analyze("database database database");
        let count = ctx
            .technical_keywords
            .iter()
            .filter(|k| k.as_str() == "database")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn emotion_and_urgency() {
        let ctx = analyze("urgent: production is down");
        assert_eq!(ctx.emotional_tone, EmotionalTone::Urgent);
        assert_eq!(ctx.urgency_level, 5);

        let ctx = analyze("this is such trouble to deal with");
        assert_eq!(ctx.emotional_tone, EmotionalTone::Frustrated);
        assert_eq!(ctx.urgency_level, 4);

        let ctx = analyze("curious, wonder how this works");
        assert_eq!(ctx.emotional_tone, EmotionalTone::Curious);
        assert_eq!(ctx.urgency_level, 1);
    }

    #[test]
    fn critical_keyword_raises_floor() {
        let ctx = analyze("critical memory leak somewhere");
        assert!(ctx.urgency_level >= 4);
    }

    #[test]
    fn intent_detection() {
        assert_eq!(
            analyze("how to implement retries").user_intent.as_deref(),
            Some("implementation")
        );
        assert_eq!(
            analyze("compare redis vs memcached").user_intent.as_deref(),
            Some("comparison")
        );
        assert_eq!(analyze("greetings").user_intent, None);
    }
}
