//! Parsing a transcript from disk, end to end through the assembler.

use std::io::Write;

use sage_transcript::{assemble_turn, AssembleRequest, TranscriptParser};

#[test]
fn file_to_canonical_turn() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"{{"type":"user","uuid":"u1","timestamp":"2026-03-01T10:00:00Z","message":{{"content":"What is a B-tree?"}}}}"#
    )
    .unwrap();
    writeln!(file, "{{malformed line").unwrap();
    writeln!(
        file,
        r#"{{"type":"assistant","uuid":"a1","timestamp":"2026-03-01T10:00:05Z","message":{{"content":[{{"type":"text","text":"A self-balancing search tree."}}]}}}}"#
    )
    .unwrap();

    let parser = TranscriptParser::default();
    let parsed = parser.parse_jsonl(file.path()).unwrap();
    assert_eq!(parsed.messages.len(), 2);
    assert_eq!(parsed.skipped_lines, 1);

    let turn = assemble_turn(
        &parsed,
        AssembleRequest {
            session_id: "7f1b9a3e-2ad6-4b6f-8f4e-2f4f6f36d1aa",
            project_id: "abcdef012345",
            project_name: "demo",
            source: "claude_cli_jsonl",
            hook_tool_calls: vec![],
        },
    )
    .unwrap();

    assert_eq!(turn.user_prompt, "What is a B-tree?");
    assert_eq!(turn.assistant_response, "A self-balancing search tree.");
    // The turn carries the assistant message's instant.
    assert_eq!(turn.timestamp.to_rfc3339(), "2026-03-01T10:00:05+00:00");
}
