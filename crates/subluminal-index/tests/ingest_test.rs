//! Event-stream projection: upsert collapsing, out-of-order arrival,
//! idempotent re-ingest, and skip-never-fail line handling.

use serde_json::json;
use subluminal_index::{Database, ToolCallFilter, ingest_lines};
use subluminal_testing::RunStream;
use subluminal_types::{DecisionAction, RunStatus};

fn fixture_stream() -> RunStream {
    let mut stream = RunStream::new("run-ingest");
    stream.allowed_call("fs", "read", json!({"path": "/tmp/a"}));
    stream.blocked_call(
        "fs",
        "delete",
        json!({"path": "/tmp/b"}),
        DecisionAction::RejectWithHint,
        "deny-delete",
    );
    stream.end(RunStatus::Succeeded);
    stream
}

#[test]
fn projects_full_run_into_all_tables() {
    let mut db = Database::open_in_memory().unwrap();
    let stream = fixture_stream();
    let report = ingest_lines(&mut db, &stream.jsonl()).unwrap();

    assert_eq!(report.events, 8);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.run_starts, 1);
    assert_eq!(report.run_ends, 1);
    assert_eq!(report.call_starts, 2);
    assert_eq!(report.call_decisions, 2);
    assert_eq!(report.call_ends, 2);

    let run = db.get_run("run-ingest").unwrap().unwrap();
    assert_eq!(run.agent_id.as_deref(), Some("fixture-agent"));
    assert_eq!(run.client.as_deref(), Some("claude"));
    assert_eq!(run.status.as_deref(), Some("SUCCEEDED"));
    assert!(run.started_at.is_some());
    assert!(run.ended_at.is_some());
    assert!(run.metadata_json.is_some());

    let rows = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();
    assert_eq!(rows.len(), 2);

    let allowed = &rows[0];
    assert_eq!(allowed.call_id, "call-0001");
    assert_eq!(allowed.server_name.as_deref(), Some("fs"));
    assert_eq!(allowed.tool_name.as_deref(), Some("read"));
    assert_eq!(allowed.decision.as_deref(), Some("ALLOW"));
    assert_eq!(allowed.status.as_deref(), Some("OK"));
    assert_eq!(allowed.latency_ms, Some(4));
    assert!(allowed.args_hash.as_deref().unwrap().len() == 64);

    let blocked = &rows[1];
    assert_eq!(blocked.decision.as_deref(), Some("REJECT_WITH_HINT"));
    assert_eq!(blocked.rule_id.as_deref(), Some("deny-delete"));
    assert_eq!(blocked.status.as_deref(), Some("ERROR"));

    // Previews and hints landed in their side tables.
    let preview = db.get_preview("call-0001").unwrap().unwrap();
    assert!(preview.args_preview.unwrap().contains("/tmp/a"));
    assert!(preview.result_preview.unwrap().contains("ok"));

    let hint = db.get_hint("call-0002").unwrap().unwrap();
    assert_eq!(hint.hint_text.as_deref(), Some("try a narrower call"));
    assert!(hint.suggested_args_json.unwrap().contains("limit"));
}

#[test]
fn out_of_order_events_collapse_onto_one_row() {
    let mut db = Database::open_in_memory().unwrap();
    let stream = fixture_stream();
    let mut lines = stream_lines(&stream);
    // Reverse the whole stream: ends before decisions before starts.
    lines.reverse();
    let reversed: String = lines.join("\n");
    ingest_lines(&mut db, &reversed).unwrap();

    let rows = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert!(row.decision.is_some());
        assert!(row.status.is_some());
        assert!(row.created_at.is_some(), "start columns filled late");
        assert!(row.server_name.is_some());
    }
}

#[test]
fn reingest_is_idempotent() {
    let mut db = Database::open_in_memory().unwrap();
    let stream = fixture_stream();
    ingest_lines(&mut db, &stream.jsonl()).unwrap();
    let first = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();

    ingest_lines(&mut db, &stream.jsonl()).unwrap();
    let second = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}

#[test]
fn unparseable_lines_are_counted_not_fatal() {
    let mut db = Database::open_in_memory().unwrap();
    let stream = fixture_stream();
    let input = format!("not json\n{}\n{{\"v\":true}}\n", stream.jsonl().trim_end());
    let report = ingest_lines(&mut db, &input).unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(report.events, 8);
}

#[test]
fn preview_truncated_is_or_of_start_and_end() {
    // Hand-build a start with truncated=false and an end with
    // truncated=true; the row must record truncation.
    let stream = fixture_stream();
    let lines = stream_lines(&stream);
    let start_line = &lines[1];
    let end_line = lines[3].replace("\"truncated\":false", "\"truncated\":true");

    let mut db = Database::open_in_memory().unwrap();
    ingest_lines(&mut db, &format!("{}\n{}\n", start_line, end_line)).unwrap();

    let rows = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();
    assert!(rows[0].preview_truncated);
}

fn stream_lines(stream: &RunStream) -> Vec<String> {
    stream.jsonl().lines().map(str::to_string).collect()
}
