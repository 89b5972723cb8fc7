//! Filtered selection and keyset pagination over `tool_calls`.

use serde_json::json;
use subluminal_index::{Database, ToolCallFilter, ingest_lines};
use subluminal_testing::RunStream;
use subluminal_types::{DecisionAction, RunStatus};

fn seeded_db(calls: usize) -> Database {
    let mut db = Database::open_in_memory().unwrap();
    let mut stream = RunStream::new("run-query");
    for i in 0..calls {
        if i % 3 == 2 {
            stream.blocked_call(
                "net",
                "fetch",
                json!({"i": i}),
                DecisionAction::Block,
                "deny-net",
            );
        } else {
            stream.allowed_call("fs", "read", json!({"i": i}));
        }
    }
    stream.end(RunStatus::Succeeded);
    ingest_lines(&mut db, &stream.jsonl()).unwrap();
    db
}

#[test]
fn keyset_cursor_excludes_cursor_row_and_includes_all_greater() {
    let db = seeded_db(10);
    let all = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();
    assert_eq!(all.len(), 10);

    for (i, cursor_row) in all.iter().enumerate() {
        let filter = ToolCallFilter {
            after: Some((
                cursor_row.created_at.clone().unwrap(),
                cursor_row.call_id.clone(),
            )),
            ..ToolCallFilter::default()
        };
        let page = db.fetch_tool_calls(&filter, false, None, None).unwrap();
        let expected: Vec<&str> = all[i + 1..].iter().map(|r| r.call_id.as_str()).collect();
        let got: Vec<&str> = page.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(got, expected, "cursor at {}", cursor_row.call_id);
    }
}

#[test]
fn keyset_pagination_walks_without_gaps_or_repeats() {
    let db = seeded_db(10);
    let mut cursor: Option<(String, String)> = None;
    let mut seen = Vec::new();
    loop {
        let filter = ToolCallFilter {
            after: cursor.clone(),
            ..ToolCallFilter::default()
        };
        let page = db.fetch_tool_calls(&filter, false, Some(3), None).unwrap();
        if page.is_empty() {
            break;
        }
        for row in &page {
            seen.push(row.call_id.clone());
        }
        let last = page.last().unwrap();
        cursor = Some((last.created_at.clone().unwrap(), last.call_id.clone()));
    }
    let all: Vec<String> = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap()
        .into_iter()
        .map(|r| r.call_id)
        .collect();
    assert_eq!(seen, all);
}

#[test]
fn glob_and_equality_filters() {
    let db = seeded_db(9);

    let glob = db
        .fetch_tool_calls(
            &ToolCallFilter {
                tool: Some("fe*".to_string()),
                ..ToolCallFilter::default()
            },
            false,
            None,
            None,
        )
        .unwrap();
    assert_eq!(glob.len(), 3);
    assert!(glob.iter().all(|r| r.tool_name.as_deref() == Some("fetch")));

    let exact = db
        .fetch_tool_calls(
            &ToolCallFilter {
                server: Some("fs".to_string()),
                ..ToolCallFilter::default()
            },
            false,
            None,
            None,
        )
        .unwrap();
    assert_eq!(exact.len(), 6);

    let none = db
        .fetch_tool_calls(
            &ToolCallFilter {
                server: Some("f".to_string()),
                ..ToolCallFilter::default()
            },
            false,
            None,
            None,
        )
        .unwrap();
    assert!(none.is_empty(), "equality must not prefix-match");
}

#[test]
fn decision_and_status_filters() {
    let db = seeded_db(9);
    let blocked = db
        .fetch_tool_calls(
            &ToolCallFilter {
                decision: Some("BLOCK".to_string()),
                status: Some("ERROR".to_string()),
                ..ToolCallFilter::default()
            },
            false,
            None,
            None,
        )
        .unwrap();
    assert_eq!(blocked.len(), 3);
}

#[test]
fn since_filter_is_inclusive() {
    let db = seeded_db(5);
    let all = db
        .fetch_tool_calls(&ToolCallFilter::default(), false, None, None)
        .unwrap();
    let third = &all[2];
    let since = db
        .fetch_tool_calls(
            &ToolCallFilter {
                since_created_at: third.created_at.clone(),
                ..ToolCallFilter::default()
            },
            false,
            None,
            None,
        )
        .unwrap();
    assert_eq!(since.len(), 3);
    assert_eq!(since[0].call_id, third.call_id);
}

#[test]
fn descending_order_with_limit_and_offset() {
    let db = seeded_db(5);
    let page = db
        .fetch_tool_calls(&ToolCallFilter::default(), true, Some(2), Some(1))
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].call_id, "call-0004");
    assert_eq!(page[1].call_id, "call-0003");
}
