//! Ledger subcommands end to end: ingest a fixture stream, query it
//! back with filters and cursors, and export the reconstructed run.

use assert_cmd::Command;
use serde_json::{Value, json};
use subluminal_testing::RunStream;
use subluminal_types::{DecisionAction, RunStatus};

struct LedgerWorld {
    dir: tempfile::TempDir,
}

impl LedgerWorld {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn db(&self) -> String {
        self.dir.path().join("ledger.db").to_string_lossy().into_owned()
    }

    fn write_stream(&self, name: &str, stream: &RunStream) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, stream.jsonl()).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn sub(&self, args: &[&str]) -> std::process::Output {
        Command::cargo_bin("sub")
            .unwrap()
            .args(args)
            .output()
            .unwrap()
    }
}

fn fixture() -> RunStream {
    let mut stream = RunStream::new("run-cli-ledger");
    stream.allowed_call("fs", "read", json!({"path": "/a"}));
    stream.allowed_call("fs", "write", json!({"path": "/b"}));
    stream.blocked_call(
        "net",
        "post",
        json!({"url": "https://x"}),
        DecisionAction::Block,
        "deny-net",
    );
    stream.end(RunStatus::Succeeded);
    stream
}

#[test]
fn ingest_then_query_json() {
    let world = LedgerWorld::new();
    let input = world.write_stream("events.jsonl", &fixture());

    let out = world.sub(&["ingest", "--db", &world.db(), &input]);
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    assert!(text.contains("8 events"), "got: {}", text);

    let out = world.sub(&["query", "--db", &world.db(), "--format", "json"]);
    assert!(out.status.success());
    let rows: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["call_id"], "call-0001");
    assert_eq!(rows[2]["decision"], "BLOCK");
    assert_eq!(rows[2]["rule_id"], "deny-net");
}

#[test]
fn query_filters_and_cursor() {
    let world = LedgerWorld::new();
    let input = world.write_stream("events.jsonl", &fixture());
    assert!(world.sub(&["ingest", "--db", &world.db(), &input]).status.success());

    // Glob filter on tool.
    let out = world.sub(&[
        "query", "--db", &world.db(), "--tool", "w*", "--format", "json",
    ]);
    let rows: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["tool_name"], "write");

    // Keyset cursor: everything after the first row.
    let out = world.sub(&["query", "--db", &world.db(), "--format", "json"]);
    let all: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
    let cursor = format!(
        "{}:{}",
        all[0]["created_at"].as_str().unwrap(),
        all[0]["call_id"].as_str().unwrap()
    );
    let out = world.sub(&[
        "query", "--db", &world.db(), "--after", &cursor, "--format", "json",
    ]);
    let rest: Vec<Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0]["call_id"], "call-0002");
}

#[test]
fn export_reconstructs_jsonl() {
    let world = LedgerWorld::new();
    let input = world.write_stream("events.jsonl", &fixture());
    assert!(world.sub(&["ingest", "--db", &world.db(), &input]).status.success());

    let out = world.sub(&["export", "--db", &world.db(), "--run-id", "run-cli-ledger"]);
    assert!(out.status.success());
    let events: Vec<Value> = String::from_utf8(out.stdout)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    // run_start + 3 calls x (start, decision, end) + run_end
    assert_eq!(events.len(), 11);
    assert_eq!(events[0]["type"], "run_start");
    assert_eq!(events[10]["type"], "run_end");
    assert_eq!(events[10]["summary"]["calls_total"], 3);

    // Run-id prefix resolution works too.
    let out = world.sub(&["export", "--db", &world.db(), "--run-id", "run-cli"]);
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap().lines().count(), 11);
}

#[test]
fn ingest_from_stdin() {
    let world = LedgerWorld::new();
    let out = Command::cargo_bin("sub")
        .unwrap()
        .args(["ingest", "--db", &world.db(), "-", "--format", "json"])
        .write_stdin(fixture().jsonl())
        .output()
        .unwrap();
    assert!(out.status.success());
    let report: Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["events"], 8);
    assert_eq!(report["call_starts"], 3);
}

#[test]
fn query_plain_renders_rows() {
    let world = LedgerWorld::new();
    let input = world.write_stream("events.jsonl", &fixture());
    assert!(world.sub(&["ingest", "--db", &world.db(), &input]).status.success());

    let out = world.sub(&["query", "--db", &world.db()]);
    assert!(out.status.success());
    let text = String::from_utf8(out.stdout).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("ALLOW"));
    assert!(text.contains("BLOCK"));
}
