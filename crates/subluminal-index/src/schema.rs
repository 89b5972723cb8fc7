use rusqlite::Connection;

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Ledger Design Rationale
//
// Why upsert-per-event (not insert-per-event)?
// - start/decision/end for one call arrive as three events, possibly
//   out of order when streams are ingested in chunks; each event type
//   contributes a disjoint column set and collapses onto the call row.
// - COALESCE preserves first-write values for fields that may be absent
//   on re-emission, so re-ingesting a file is idempotent.
//
// Why TEXT timestamps?
// - Events carry RFC3339 with fixed nanosecond precision and a Z
//   suffix, which sorts lexicographically in chronological order; the
//   keyset cursor compares strings directly.

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            agent_id TEXT,
            client TEXT,
            env TEXT,
            started_at TEXT,
            ended_at TEXT,
            status TEXT,
            metadata_json TEXT
        );

        CREATE TABLE IF NOT EXISTS tool_calls (
            call_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            server_name TEXT,
            tool_name TEXT,
            args_hash TEXT,
            decision TEXT,
            rule_id TEXT,
            status TEXT,
            latency_ms INTEGER,
            bytes_in INTEGER,
            bytes_out INTEGER,
            preview_truncated BOOLEAN DEFAULT 0,
            created_at TEXT
        );

        CREATE TABLE IF NOT EXISTS previews (
            call_id TEXT PRIMARY KEY,
            args_preview TEXT,
            result_preview TEXT,
            redaction_flags TEXT
        );

        CREATE TABLE IF NOT EXISTS hints (
            call_id TEXT PRIMARY KEY,
            hint_text TEXT,
            suggested_args_json TEXT,
            created_at TEXT
        );

        CREATE TABLE IF NOT EXISTS policy_versions (
            policy_id TEXT NOT NULL,
            version TEXT NOT NULL,
            mode TEXT,
            rules_hash TEXT,
            rules_json TEXT,
            created_at TEXT,
            PRIMARY KEY (policy_id, version)
        );

        CREATE INDEX IF NOT EXISTS idx_tool_calls_run_created ON tool_calls(run_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_server_tool ON tool_calls(server_name, tool_name);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_decision_status ON tool_calls(decision, status);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_args_hash ON tool_calls(args_hash);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS policy_versions;
        DROP TABLE IF EXISTS hints;
        DROP TABLE IF EXISTS previews;
        DROP TABLE IF EXISTS tool_calls;
        DROP TABLE IF EXISTS runs;
        "#,
    )?;
    Ok(())
}
