//! Context formatting for the `get_context` tool.
//!
//! Groups ranked results back into conversation turns, truncates at
//! sentence boundaries within the character budget, and normalises
//! the decorative separator runs some tools emit.

use sage_domain::query::RetrievalResult;

/// Rough chars-per-token estimate used for the context budget.
const CHARS_PER_TOKEN: usize = 4;

/// Separator runs collapsed to a single rule.
const SEPARATOR_RUNS: [&str; 4] = ["==========", "##########", "*****", "----------"];

/// Render ranked results as a context block within `max_tokens`.
pub fn format_context(results: &[RetrievalResult], max_tokens: usize) -> String {
    if results.is_empty() {
        return String::new();
    }

    let budget_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let mut used_chars = 0;
    let mut blocks: Vec<String> = Vec::new();

    for group in group_by_conversation(results) {
        if used_chars >= budget_chars {
            break;
        }
        let block = format_group(&group, budget_chars - used_chars);
        if !block.is_empty() {
            used_chars += block.chars().count();
            blocks.push(block);
        }
    }

    let body = normalize_separators(&blocks.join("\n\n---\n\n"));
    format!("# 相关历史上下文 (共 {} 条记录)\n\n{body}", results.len())
}

/// Adjacent results belonging to the same conversation turn (same
/// session, turn indexes within one of each other) render together.
fn group_by_conversation<'a>(results: &'a [RetrievalResult]) -> Vec<Vec<&'a RetrievalResult>> {
    let mut groups: Vec<Vec<&'a RetrievalResult>> = Vec::new();
    let mut current: Vec<&'a RetrievalResult> = Vec::new();

    for result in results {
        if let Some(last) = current.last() {
            if same_turn(last, result) {
                current.push(result);
                continue;
            }
            groups.push(std::mem::take(&mut current));
        }
        current.push(result);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

fn same_turn(a: &RetrievalResult, b: &RetrievalResult) -> bool {
    let session = |r: &RetrievalResult| {
        r.metadata
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
    };
    let turn = |r: &RetrievalResult| r.metadata.get("turn_id").and_then(|v| v.as_i64());

    match (session(a), session(b)) {
        (Some(sa), Some(sb)) if sa == sb => match (turn(a), turn(b)) {
            (Some(ta), Some(tb)) => (ta - tb).abs() <= 1,
            _ => false,
        },
        _ => false,
    }
}

fn format_group(group: &[&RetrievalResult], budget_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut used = 0;

    for result in group {
        let label = if result.role == "user" {
            "👤 用户"
        } else {
            "🤖 助手"
        };
        let overhead = label.chars().count() + 10;
        if used + overhead >= budget_chars {
            break;
        }

        let available = budget_chars - used - overhead;
        let content = smart_truncate(&result.content, available);
        let part = if result.final_score > 0.8 {
            // High-confidence hits carry their reasoning along.
            format!("{label}: {content}\n<!-- {} -->", result.reasoning)
        } else {
            format!("{label}: {content}")
        };
        used += part.chars().count();
        parts.push(part);
    }

    parts.join("\n")
}

/// Cut at a sentence boundary when one lands in the last third of the
/// budget, else cut hard with an ellipsis.
fn smart_truncate(text: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_owned();
    }
    if max_chars < 4 {
        return String::new();
    }

    let window: String = chars[..max_chars].iter().collect();
    let boundary = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '。' | '？' | '！' | '.' | '?' | '!'))
        .map(|(i, c)| i + c.len_utf8())
        .last();

    match boundary {
        Some(cut) if cut * 10 >= window.len() * 7 => format!("{}...", &window[..cut]),
        _ => {
            let keep: String = chars[..max_chars - 3].iter().collect();
            format!("{keep}...")
        }
    }
}

/// Collapse decorative separator runs and excess blank lines.
fn normalize_separators(context: &str) -> String {
    let mut out = context.to_owned();
    for run in SEPARATOR_RUNS {
        out = out.replace(run, "\n---\n");
    }
    while out.contains("\n\n\n") {
        out = out.replace("\n\n\n", "\n\n");
    }
    out.trim().to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn result(session: &str, turn: i64, role: &str, content: &str, score: f64) -> RetrievalResult {
        RetrievalResult {
            content: content.into(),
            role: role.into(),
            similarity_score: score,
            temporal_score: 0.5,
            context_score: 0.0,
            final_score: score,
            metadata: serde_json::json!({"session_id": session, "turn_id": turn}),
            reasoning: "basic match".into(),
        }
    }

    #[test]
    fn empty_results_render_nothing() {
        assert_eq!(format_context(&[], 2000), "");
    }

    #[test]
    fn header_counts_results() {
        let results = vec![result("s1", 1, "user", "question", 0.5)];
        let out = format_context(&results, 2000);
        assert!(out.starts_with("# 相关历史上下文 (共 1 条记录)"));
        assert!(out.contains("👤 用户: question"));
    }

    #[test]
    fn adjacent_turn_sides_group_together() {
        let results = vec![
            result("s1", 1, "user", "the question", 0.5),
            result("s1", 1, "assistant", "the answer", 0.5),
            result("s2", 7, "user", "unrelated", 0.5),
        ];
        let out = format_context(&results, 2000);
        let first_block = out.split("\n\n---\n\n").next().unwrap();
        assert!(first_block.contains("the question"));
        assert!(first_block.contains("the answer"));
        assert!(!first_block.contains("unrelated"));
    }

    #[test]
    fn high_scores_carry_reasoning_comments() {
        let results = vec![result("s1", 1, "assistant", "important", 0.95)];
        let out = format_context(&results, 2000);
        assert!(out.contains("<!-- basic match -->"));
    }

    #[test]
    fn truncation_prefers_sentence_boundaries() {
        let text = "First sentence. Second sentence that runs long and gets cut somewhere";
        let cut = smart_truncate(text, 40);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 43);

        let exact = smart_truncate("short", 40);
        assert_eq!(exact, "short");
    }

    #[test]
    fn chinese_sentences_truncate_cleanly() {
        let text = "第一句话。第二句话很长很长很长很长很长很长";
        let cut = smart_truncate(text, 10);
        assert!(cut.contains('。') || cut.ends_with("..."));
    }

    #[test]
    fn separator_runs_collapse() {
        let normalized = normalize_separators("a\n==========\nb\n##########\nc");
        assert!(!normalized.contains("=========="));
        assert!(!normalized.contains("##########"));
        assert!(normalized.contains("---"));
    }

    #[test]
    fn budget_bounds_the_output() {
        let long = "word ".repeat(5000);
        let results = vec![
            result("s1", 1, "user", &long, 0.5),
            result("s2", 5, "user", &long, 0.5),
        ];
        let out = format_context(&results, 100);
        // 100 tokens ≈ 400 chars plus header overhead.
        assert!(out.chars().count() < 700);
    }
}
