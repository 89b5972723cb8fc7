//! Ledger-to-JSONL reconstruction and the ingest/export round trip.

use chrono::Duration;
use serde_json::json;
use subluminal_index::{Database, ToolCallFilter, export_run, ingest_lines};
use subluminal_testing::RunStream;
use subluminal_types::{DecisionAction, EventPayload, RunStatus};

fn exported_fixture() -> (Database, Vec<subluminal_types::Event>) {
    let mut db = Database::open_in_memory().unwrap();
    let mut stream = RunStream::new("run-export");
    stream.allowed_call("fs", "read", json!({"path": "/tmp/a"}));
    stream.blocked_call(
        "net",
        "post",
        json!({"url": "https://x"}),
        DecisionAction::Block,
        "deny-net",
    );
    stream.end(RunStatus::Succeeded);
    ingest_lines(&mut db, &stream.jsonl()).unwrap();
    let events = export_run(&db, "run-export").unwrap();
    (db, events)
}

#[test]
fn export_synthesizes_the_event_sequence() {
    let (_db, events) = exported_fixture();

    let types: Vec<&str> = events
        .iter()
        .map(|e| match &e.payload {
            EventPayload::RunStart { .. } => "run_start",
            EventPayload::ToolCallStart { .. } => "tool_call_start",
            EventPayload::ToolCallDecision { .. } => "tool_call_decision",
            EventPayload::ToolCallEnd { .. } => "tool_call_end",
            EventPayload::RunEnd { .. } => "run_end",
        })
        .collect();
    assert_eq!(
        types,
        [
            "run_start",
            "tool_call_start",
            "tool_call_decision",
            "tool_call_end",
            "tool_call_start",
            "tool_call_decision",
            "tool_call_end",
            "run_end",
        ]
    );

    // Envelope identity survives the round trip.
    for event in &events {
        assert_eq!(event.run_id, "run-export");
        assert_eq!(event.agent_id, "fixture-agent");
        assert_eq!(event.source.host_id, "fixture-host");
    }

    // Sequence numbers are reconstructed contiguously.
    let seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::ToolCallStart { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(seqs, [1, 2]);
}

#[test]
fn export_end_timestamp_is_created_at_plus_latency() {
    let (_db, events) = exported_fixture();
    let mut starts = Vec::new();
    let mut ends = Vec::new();
    for event in &events {
        match &event.payload {
            EventPayload::ToolCallStart { .. } => starts.push(event.ts),
            EventPayload::ToolCallEnd { latency_ms, .. } => ends.push((event.ts, *latency_ms)),
            _ => {}
        }
    }
    for (start_ts, (end_ts, latency_ms)) in starts.iter().zip(ends.iter()) {
        assert_eq!(*end_ts, *start_ts + Duration::milliseconds(*latency_ms));
    }
}

#[test]
fn export_preserves_call_content_and_summary() {
    let (_db, events) = exported_fixture();

    match &events[1].payload {
        EventPayload::ToolCallStart { call, .. } => {
            assert_eq!(call.call_id, "call-0001");
            assert_eq!(call.server_name, "fs");
            assert_eq!(call.tool_name, "read");
            assert_eq!(call.args_hash.len(), 64);
            assert!(call.preview.args_preview.contains("/tmp/a"));
        }
        other => panic!("expected start, got {:?}", other),
    }

    match &events[5].payload {
        EventPayload::ToolCallDecision { decision, .. } => {
            assert_eq!(decision.action, DecisionAction::Block);
            assert_eq!(decision.rule_id.as_deref(), Some("deny-net"));
        }
        other => panic!("expected decision, got {:?}", other),
    }

    match &events[7].payload {
        EventPayload::RunEnd { status, summary, .. } => {
            assert_eq!(*status, RunStatus::Succeeded);
            assert_eq!(summary.calls_total, 2);
            assert_eq!(summary.calls_allowed, 1);
            assert_eq!(summary.calls_blocked, 1);
            assert_eq!(summary.errors_total, 1);
        }
        other => panic!("expected run_end, got {:?}", other),
    }
}

#[test]
fn reingesting_an_export_reproduces_the_rows() {
    let (db, events) = exported_fixture();
    let original = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();

    let jsonl: String = events
        .iter()
        .map(|e| e.serialize_line().unwrap())
        .collect();
    let mut second = Database::open_in_memory().unwrap();
    ingest_lines(&mut second, &jsonl).unwrap();
    let reproduced = second
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();

    assert_eq!(original.len(), reproduced.len());
    for (a, b) in original.iter().zip(reproduced.iter()) {
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}

#[test]
fn export_summary_matches_live_observe_mode_accounting() {
    // Observe mode: the policy computed BLOCK for the second call but
    // the proxy forwarded it anyway and counted it allowed. The ledger
    // still stores decision=BLOCK, so the exported summary must
    // classify by enforcement (status), not by the raw decision.
    let mut db = Database::open_in_memory().unwrap();
    let mut stream = RunStream::new("run-observe-export");
    stream.allowed_call("fs", "read", json!({"i": 1}));
    stream.observed_call(
        "fs",
        "rm",
        json!({"path": "/x"}),
        DecisionAction::Block,
        "deny-rm",
    );
    stream.end(RunStatus::Succeeded);

    let live_summary = match &stream.events().last().unwrap().payload {
        EventPayload::RunEnd { summary, .. } => *summary,
        other => panic!("expected run_end, got {:?}", other),
    };
    assert_eq!(live_summary.calls_total, 2);
    assert_eq!(live_summary.calls_allowed, 2);
    assert_eq!(live_summary.calls_blocked, 0);

    ingest_lines(&mut db, &stream.jsonl()).unwrap();
    let events = export_run(&db, "run-observe-export").unwrap();

    // The decision itself round-trips as computed.
    match &events[5].payload {
        EventPayload::ToolCallDecision { decision, .. } => {
            assert_eq!(decision.action, DecisionAction::Block);
            assert_eq!(decision.rule_id.as_deref(), Some("deny-rm"));
        }
        other => panic!("expected decision, got {:?}", other),
    }

    match &events.last().unwrap().payload {
        EventPayload::RunEnd { summary, .. } => {
            assert_eq!(*summary, live_summary);
            assert_eq!(summary.errors_total, 0);
        }
        other => panic!("expected run_end, got {:?}", other),
    }
}

#[test]
fn export_unknown_run_is_an_error() {
    let db = Database::open_in_memory().unwrap();
    assert!(export_run(&db, "missing").is_err());
}
