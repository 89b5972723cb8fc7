use rusqlite::{Connection, ToSql, params};

use crate::Result;
use crate::records::ToolCallRecord;

pub const TOOL_CALL_COLUMNS: &str = "call_id, run_id, server_name, tool_name, args_hash, \
     decision, rule_id, status, latency_ms, bytes_in, bytes_out, preview_truncated, created_at";

/// Filters for tool-call selection. String filters become named bind
/// parameters; `server`/`tool` switch to GLOB matching when the value
/// contains `*`, `?`, or `[`.
#[derive(Debug, Clone, Default)]
pub struct ToolCallFilter {
    pub run_id: Option<String>,
    pub server: Option<String>,
    pub tool: Option<String>,
    pub decision: Option<String>,
    pub status: Option<String>,
    /// Inclusive lower bound on created_at
    pub since_created_at: Option<String>,
    /// Keyset cursor: rows strictly after (created_at, call_id)
    pub after: Option<(String, String)>,
}

fn is_glob(value: &str) -> bool {
    value.contains(['*', '?', '['])
}

/// Build a parameterised selection over `tool_calls`. Returns the SQL
/// and the named parameters to bind. Ordering is total — created_at,
/// then call_id — in the requested direction.
pub fn build_tool_call_query(
    columns: &str,
    filter: &ToolCallFilter,
    order_desc: bool,
    limit: Option<u64>,
    offset: Option<u64>,
) -> (String, Vec<(&'static str, String)>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<(&'static str, String)> = Vec::new();

    if let Some(run_id) = &filter.run_id {
        clauses.push("run_id = :run_id".to_string());
        params.push((":run_id", run_id.clone()));
    }
    if let Some(server) = &filter.server {
        let op = if is_glob(server) { "GLOB" } else { "=" };
        clauses.push(format!("server_name {} :server", op));
        params.push((":server", server.clone()));
    }
    if let Some(tool) = &filter.tool {
        let op = if is_glob(tool) { "GLOB" } else { "=" };
        clauses.push(format!("tool_name {} :tool", op));
        params.push((":tool", tool.clone()));
    }
    if let Some(decision) = &filter.decision {
        clauses.push("decision = :decision".to_string());
        params.push((":decision", decision.clone()));
    }
    if let Some(status) = &filter.status {
        clauses.push("status = :status".to_string());
        params.push((":status", status.clone()));
    }
    if let Some(since) = &filter.since_created_at {
        clauses.push("created_at >= :since".to_string());
        params.push((":since", since.clone()));
    }
    if let Some((created_at, call_id)) = &filter.after {
        clauses.push(
            "(created_at > :after OR (created_at = :after AND call_id > :after_call_id))"
                .to_string(),
        );
        params.push((":after", created_at.clone()));
        params.push((":after_call_id", call_id.clone()));
    }

    let mut sql = format!("SELECT {} FROM tool_calls", columns);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    let direction = if order_desc { "DESC" } else { "ASC" };
    sql.push_str(&format!(
        " ORDER BY created_at {dir}, call_id {dir}",
        dir = direction
    ));
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    if let Some(offset) = offset {
        sql.push_str(&format!(" OFFSET {}", offset));
    }

    (sql, params)
}

pub fn fetch(
    conn: &Connection,
    filter: &ToolCallFilter,
    order_desc: bool,
    limit: Option<u64>,
    offset: Option<u64>,
) -> Result<Vec<ToolCallRecord>> {
    let (sql, params) = build_tool_call_query(TOOL_CALL_COLUMNS, filter, order_desc, limit, offset);
    let mut stmt = conn.prepare(&sql)?;
    let bind: Vec<(&str, &dyn ToSql)> = params
        .iter()
        .map(|(name, value)| (*name, value as &dyn ToSql))
        .collect();
    let rows = stmt
        .query_map(bind.as_slice(), row_to_record)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    Ok(rows)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> std::result::Result<ToolCallRecord, rusqlite::Error> {
    Ok(ToolCallRecord {
        call_id: row.get(0)?,
        run_id: row.get(1)?,
        server_name: row.get(2)?,
        tool_name: row.get(3)?,
        args_hash: row.get(4)?,
        decision: row.get(5)?,
        rule_id: row.get(6)?,
        status: row.get(7)?,
        latency_ms: row.get(8)?,
        bytes_in: row.get(9)?,
        bytes_out: row.get(10)?,
        preview_truncated: row.get(11)?,
        created_at: row.get(12)?,
    })
}

pub fn upsert_start(
    conn: &Connection,
    call_id: &str,
    run_id: &str,
    server_name: &str,
    tool_name: &str,
    args_hash: &str,
    bytes_in: i64,
    preview_truncated: bool,
    created_at: &str,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tool_calls (call_id, run_id, server_name, tool_name, args_hash,
                                bytes_in, preview_truncated, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(call_id) DO UPDATE SET
            server_name = COALESCE(tool_calls.server_name, ?3),
            tool_name = COALESCE(tool_calls.tool_name, ?4),
            args_hash = COALESCE(tool_calls.args_hash, ?5),
            bytes_in = COALESCE(tool_calls.bytes_in, ?6),
            preview_truncated = (tool_calls.preview_truncated OR ?7),
            created_at = COALESCE(tool_calls.created_at, ?8)
        "#,
        params![
            call_id,
            run_id,
            server_name,
            tool_name,
            args_hash,
            bytes_in,
            preview_truncated,
            created_at
        ],
    )?;
    Ok(())
}

pub fn upsert_decision(
    conn: &Connection,
    call_id: &str,
    run_id: &str,
    server_name: &str,
    tool_name: &str,
    args_hash: &str,
    decision: &str,
    rule_id: Option<&str>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tool_calls (call_id, run_id, server_name, tool_name, args_hash,
                                decision, rule_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(call_id) DO UPDATE SET
            server_name = COALESCE(tool_calls.server_name, ?3),
            tool_name = COALESCE(tool_calls.tool_name, ?4),
            args_hash = COALESCE(tool_calls.args_hash, ?5),
            decision = ?6,
            rule_id = ?7
        "#,
        params![call_id, run_id, server_name, tool_name, args_hash, decision, rule_id],
    )?;
    Ok(())
}

pub fn upsert_end(
    conn: &Connection,
    call_id: &str,
    run_id: &str,
    status: &str,
    latency_ms: i64,
    bytes_out: i64,
    preview_truncated: bool,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO tool_calls (call_id, run_id, status, latency_ms, bytes_out, preview_truncated)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(call_id) DO UPDATE SET
            status = ?3,
            latency_ms = ?4,
            bytes_out = ?5,
            preview_truncated = (tool_calls.preview_truncated OR ?6)
        "#,
        params![call_id, run_id, status, latency_ms, bytes_out, preview_truncated],
    )?;
    Ok(())
}
