use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::io::BufRead;
use subluminal_types::{Event, EventPayload, RunInfo};

use crate::export::RunMetadata;
use crate::queries::{run, side, tool_call};
use crate::records::{HintRecord, PolicyVersionRecord, RunRecord};
use crate::{Database, Result};

/// Per-type counts for one ingestion pass.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct IngestReport {
    pub lines: u64,
    pub events: u64,
    /// Lines that were not parseable events; counted, never fatal
    pub skipped: u64,
    pub run_starts: u64,
    pub run_ends: u64,
    pub call_starts: u64,
    pub call_decisions: u64,
    pub call_ends: u64,
}

/// Project a JSONL event stream into the ledger in a single
/// transaction. Upserts throughout, so events may arrive out of order
/// for the same call and re-ingesting a file is idempotent.
pub fn ingest_reader<R: BufRead>(db: &mut Database, reader: R) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let tx = db.conn_mut().transaction()?;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        report.lines += 1;
        let event = match Event::parse_line(&line) {
            Ok(event) => event,
            Err(_) => {
                report.skipped += 1;
                continue;
            }
        };
        project(&tx, &event, &mut report)?;
        report.events += 1;
    }

    tx.commit()?;
    Ok(report)
}

/// Convenience wrapper over [`ingest_reader`] for in-memory input.
pub fn ingest_lines(db: &mut Database, input: &str) -> Result<IngestReport> {
    ingest_reader(db, std::io::Cursor::new(input))
}

fn ts_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn envelope_run_info(event: &Event) -> RunInfo {
    RunInfo {
        run_id: event.run_id.clone(),
        agent_id: event.agent_id.clone(),
        client: event.client,
        env: event.env,
        principal: event.principal.clone(),
        workload: event.workload.clone(),
    }
}

fn project(conn: &Connection, event: &Event, report: &mut IngestReport) -> Result<()> {
    match &event.payload {
        EventPayload::RunStart {
            started_at,
            mode,
            policy,
        } => {
            let metadata = RunMetadata {
                run: envelope_run_info(event),
                source: event.source.clone(),
                mode: *mode,
                policy: policy.clone(),
            };
            run::upsert_start(
                conn,
                &RunRecord {
                    run_id: event.run_id.clone(),
                    agent_id: Some(event.agent_id.clone()),
                    client: Some(event.client.to_string()),
                    env: Some(event.env.to_string()),
                    started_at: Some(ts_string(started_at)),
                    ended_at: None,
                    status: None,
                    metadata_json: serde_json::to_string(&metadata).ok(),
                },
            )?;
            side::upsert_policy_version(
                conn,
                &PolicyVersionRecord {
                    policy_id: policy.policy_id.clone(),
                    version: policy.policy_version.clone(),
                    mode: Some(mode.to_string()),
                    rules_hash: Some(policy.policy_hash.clone()),
                    rules_json: None,
                    created_at: Some(ts_string(&event.ts)),
                },
            )?;
            report.run_starts += 1;
        }

        EventPayload::ToolCallStart { call, seq: _ } => {
            tool_call::upsert_start(
                conn,
                &call.call_id,
                &event.run_id,
                &call.server_name,
                &call.tool_name,
                &call.args_hash,
                call.bytes_in as i64,
                call.preview.truncated,
                &ts_string(&event.ts),
            )?;
            if !call.preview.args_preview.is_empty() {
                side::upsert_args_preview(conn, &call.call_id, &call.preview.args_preview, None)?;
            }
            report.call_starts += 1;
        }

        EventPayload::ToolCallDecision { call, decision } => {
            tool_call::upsert_decision(
                conn,
                &call.call_id,
                &event.run_id,
                &call.server_name,
                &call.tool_name,
                &call.args_hash,
                &decision.action.to_string(),
                decision.rule_id.as_deref(),
            )?;
            if let Some(hint) = &decision.hint {
                side::upsert_hint(
                    conn,
                    &HintRecord {
                        call_id: call.call_id.clone(),
                        hint_text: Some(hint.hint_text.clone()),
                        suggested_args_json: hint
                            .suggested_args
                            .as_ref()
                            .and_then(|v| serde_json::to_string(v).ok()),
                        created_at: Some(ts_string(&event.ts)),
                    },
                )?;
            }
            side::upsert_policy_version(
                conn,
                &PolicyVersionRecord {
                    policy_id: decision.policy.policy_id.clone(),
                    version: decision.policy.policy_version.clone(),
                    mode: None,
                    rules_hash: Some(decision.policy.policy_hash.clone()),
                    rules_json: None,
                    created_at: Some(ts_string(&event.ts)),
                },
            )?;
            report.call_decisions += 1;
        }

        EventPayload::ToolCallEnd {
            call,
            status,
            latency_ms,
            bytes_out,
            preview,
            error: _,
        } => {
            tool_call::upsert_end(
                conn,
                &call.call_id,
                &event.run_id,
                &status.to_string(),
                *latency_ms,
                *bytes_out as i64,
                preview.truncated,
            )?;
            if !preview.result_preview.is_empty() {
                side::upsert_result_preview(conn, &call.call_id, &preview.result_preview)?;
            }
            report.call_ends += 1;
        }

        EventPayload::RunEnd {
            ended_at, status, ..
        } => {
            run::upsert_end(
                conn,
                &event.run_id,
                &ts_string(ended_at),
                &status.to_string(),
            )?;
            report.run_ends += 1;
        }
    }
    Ok(())
}
