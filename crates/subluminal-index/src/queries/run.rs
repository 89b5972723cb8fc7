use rusqlite::{Connection, OptionalExtension, params};

use crate::records::RunRecord;
use crate::{Error, Result};

pub fn upsert_start(conn: &Connection, run: &RunRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO runs (run_id, agent_id, client, env, started_at, metadata_json)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(run_id) DO UPDATE SET
            agent_id = COALESCE(runs.agent_id, ?2),
            client = COALESCE(runs.client, ?3),
            env = COALESCE(runs.env, ?4),
            started_at = COALESCE(runs.started_at, ?5),
            metadata_json = COALESCE(runs.metadata_json, ?6)
        "#,
        params![
            &run.run_id,
            &run.agent_id,
            &run.client,
            &run.env,
            &run.started_at,
            &run.metadata_json
        ],
    )?;
    Ok(())
}

pub fn upsert_end(
    conn: &Connection,
    run_id: &str,
    ended_at: &str,
    status: &str,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO runs (run_id, ended_at, status)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(run_id) DO UPDATE SET
            ended_at = ?2,
            status = ?3
        "#,
        params![run_id, ended_at, status],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, run_id: &str) -> Result<Option<RunRecord>> {
    let record = conn
        .query_row(
            r#"
            SELECT run_id, agent_id, client, env, started_at, ended_at, status, metadata_json
            FROM runs
            WHERE run_id = ?1
            "#,
            [run_id],
            |row| {
                Ok(RunRecord {
                    run_id: row.get(0)?,
                    agent_id: row.get(1)?,
                    client: row.get(2)?,
                    env: row.get(3)?,
                    started_at: row.get(4)?,
                    ended_at: row.get(5)?,
                    status: row.get(6)?,
                    metadata_json: row.get(7)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

pub fn find_by_prefix(conn: &Connection, prefix: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT run_id
        FROM runs
        WHERE run_id LIKE ?1
        LIMIT 2
        "#,
    )?;

    let pattern = format!("{}%", prefix);
    let mut matches: Vec<String> = stmt
        .query_map([&pattern], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    match matches.len() {
        0 => Ok(None),
        1 => Ok(Some(matches.remove(0))),
        _ => Err(Error::Query(format!(
            "Ambiguous run ID prefix '{}': multiple runs match",
            prefix
        ))),
    }
}
