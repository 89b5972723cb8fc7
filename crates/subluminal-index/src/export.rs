use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subluminal_types::{
    ArgsPreview, CallInfo, CallRef, CallStatus, Decision, DecisionAction, Event, EventPayload,
    Explain, Hint, Mode, PolicyInfo, ResultPreview, RunInfo, RunStatus, RunSummary, Severity,
    SourceInfo,
};

use crate::queries::tool_call::ToolCallFilter;
use crate::records::ToolCallRecord;
use crate::{Database, Error, Result};

/// Original run context, stored as `runs.metadata_json` at ingestion
/// so the event stream can be reconstructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run: RunInfo,
    pub source: SourceInfo,
    pub mode: Mode,
    pub policy: PolicyInfo,
}

/// Reconstruct the event stream for a run from the ledger: `run_start`,
/// then per call start / decision (if one exists) / end (if a status
/// exists), then `run_end`. The reconstructed `tool_call_end.ts` is
/// `created_at + latency_ms`.
pub fn export_run(db: &Database, run_id: &str) -> Result<Vec<Event>> {
    let run_row = db
        .get_run(run_id)?
        .ok_or_else(|| Error::Query(format!("run '{}' not found", run_id)))?;

    let metadata: RunMetadata = match &run_row.metadata_json {
        Some(json) => serde_json::from_str(json)
            .map_err(|e| Error::Decode(format!("run metadata: {}", e)))?,
        None => RunMetadata {
            run: RunInfo::new(run_row.run_id.clone(), run_row.agent_id.clone().unwrap_or_default()),
            source: SourceInfo {
                host_id: String::new(),
                proc_id: String::new(),
                shim_id: String::new(),
            },
            mode: Mode::default(),
            policy: PolicyInfo::none(),
        },
    };

    let mut events = Vec::new();
    let started_at = run_row.started_at.as_deref().map(parse_ts).transpose()?;

    if let Some(started_at) = started_at {
        events.push(Event::at(
            started_at,
            &metadata.run,
            &metadata.source,
            EventPayload::RunStart {
                started_at,
                mode: metadata.mode,
                policy: metadata.policy.clone(),
            },
        ));
    }

    let rows = db.fetch_tool_calls(
        &ToolCallFilter {
            run_id: Some(run_id.to_string()),
            ..ToolCallFilter::default()
        },
        false,
        None,
        None,
    )?;

    let mut summary = RunSummary {
        calls_total: rows.len() as u64,
        ..RunSummary::default()
    };

    for (index, row) in rows.iter().enumerate() {
        synthesize_call_events(db, &metadata, row, index as u64 + 1, &mut events)?;
        // The decision column stores the computed action even when the
        // call was forwarded (observe mode). Mirror the live
        // accounting: a call counts as blocked/throttled only when it
        // was actually enforced, i.e. closed out locally with ERROR.
        let non_allow = matches!(
            row.decision.as_deref(),
            Some("BLOCK") | Some("REJECT_WITH_HINT") | Some("TERMINATE_RUN") | Some("THROTTLE")
        );
        let enforced = non_allow && row.status.as_deref() == Some("ERROR");
        if enforced {
            if row.decision.as_deref() == Some("THROTTLE") {
                summary.calls_throttled += 1;
            } else {
                summary.calls_blocked += 1;
            }
        } else {
            summary.calls_allowed += 1;
        }
        if row.status.as_deref() == Some("ERROR") {
            summary.errors_total += 1;
        }
    }

    if let (Some(ended_at), Some(status)) = (&run_row.ended_at, &run_row.status) {
        let ended_at = parse_ts(ended_at)?;
        if let Some(started_at) = started_at {
            summary.duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        }
        let status: RunStatus = parse_enum(status)
            .ok_or_else(|| Error::Decode(format!("run status '{}'", status)))?;
        events.push(Event::at(
            ended_at,
            &metadata.run,
            &metadata.source,
            EventPayload::RunEnd {
                ended_at,
                status,
                summary,
            },
        ));
    }

    Ok(events)
}

fn synthesize_call_events(
    db: &Database,
    metadata: &RunMetadata,
    row: &ToolCallRecord,
    seq: u64,
    events: &mut Vec<Event>,
) -> Result<()> {
    let Some(created_at) = row.created_at.as_deref() else {
        // A row created by a decision/end-only stream has no start
        // column set; nothing to anchor the sequence on.
        return Ok(());
    };
    let created_at = parse_ts(created_at)?;
    let preview_row = db.get_preview(&row.call_id)?;

    let call_info = CallInfo {
        call_id: row.call_id.clone(),
        server_name: row.server_name.clone().unwrap_or_default(),
        tool_name: row.tool_name.clone().unwrap_or_default(),
        transport: "stdio".to_string(),
        args_hash: row.args_hash.clone().unwrap_or_default(),
        args_stream_hash: None,
        bytes_in: row.bytes_in.unwrap_or(0).max(0) as u64,
        preview: ArgsPreview {
            truncated: row.preview_truncated,
            args_preview: preview_row
                .as_ref()
                .and_then(|p| p.args_preview.clone())
                .unwrap_or_default(),
        },
    };
    let call_ref = CallRef::from(&call_info);

    events.push(Event::at(
        created_at,
        &metadata.run,
        &metadata.source,
        EventPayload::ToolCallStart {
            call: call_info,
            seq,
        },
    ));

    if let Some(action) = row.decision.as_deref() {
        let action: DecisionAction =
            parse_enum(action).ok_or_else(|| Error::Decode(format!("decision '{}'", action)))?;
        let hint = db.get_hint(&row.call_id)?.map(|h| Hint {
            hint_text: h.hint_text.unwrap_or_default(),
            hint_kind: None,
            suggested_args: h
                .suggested_args_json
                .as_deref()
                .and_then(|j| serde_json::from_str::<Value>(j).ok()),
            retry_advice: None,
        });
        events.push(Event::at(
            created_at,
            &metadata.run,
            &metadata.source,
            EventPayload::ToolCallDecision {
                call: call_ref.clone(),
                decision: Decision {
                    action,
                    rule_id: row.rule_id.clone(),
                    severity: Severity::Info,
                    explain: Explain {
                        summary: String::new(),
                        reason_code: String::new(),
                    },
                    policy: metadata.policy.clone(),
                    backoff_ms: None,
                    hint,
                },
            },
        ));
    }

    if let Some(status) = row.status.as_deref() {
        let status: CallStatus =
            parse_enum(status).ok_or_else(|| Error::Decode(format!("status '{}'", status)))?;
        let latency_ms = row.latency_ms.unwrap_or(0);
        let end_ts = created_at + Duration::milliseconds(latency_ms.max(0));
        events.push(Event::at(
            end_ts,
            &metadata.run,
            &metadata.source,
            EventPayload::ToolCallEnd {
                call: call_ref,
                status,
                latency_ms,
                bytes_out: row.bytes_out.unwrap_or(0).max(0) as u64,
                preview: ResultPreview {
                    truncated: row.preview_truncated,
                    result_preview: preview_row
                        .and_then(|p| p.result_preview)
                        .unwrap_or_default(),
                },
                error: None,
            },
        ));
    }

    Ok(())
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("timestamp '{}': {}", value, e)))
}

fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Option<T> {
    serde_json::from_value(Value::String(value.to_string())).ok()
}
