//! Deterministic event-stream fixtures.
//!
//! Builds well-formed runs (start, call trios, end) with fixed
//! timestamps and sequential call ids, so ledger tests do not depend
//! on wall-clock time or UUID generation.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use subluminal_core::args_hash;
use subluminal_types::{
    ArgsPreview, CallInfo, CallRef, CallStatus, Client, Decision, DecisionAction, Env, ErrorClass,
    ErrorDetail, Event, EventPayload, Explain, Hint, Mode, PolicyInfo, ResultPreview, RunInfo,
    RunStatus, RunSummary, Severity, SourceInfo,
};

const STEP_MS: i64 = 10;

/// Builder for one run's event stream.
pub struct RunStream {
    run: RunInfo,
    source: SourceInfo,
    policy: PolicyInfo,
    mode: Mode,
    seq: u64,
    summary: RunSummary,
    events: Vec<Event>,
}

impl RunStream {
    pub fn new(run_id: &str) -> Self {
        Self::with_policy(
            run_id,
            Mode::Observe,
            PolicyInfo {
                policy_id: "fixture-policy".to_string(),
                policy_version: "1".to_string(),
                policy_hash: "f".repeat(64),
            },
        )
    }

    pub fn with_policy(run_id: &str, mode: Mode, policy: PolicyInfo) -> Self {
        let run = RunInfo {
            run_id: run_id.to_string(),
            agent_id: "fixture-agent".to_string(),
            client: Client::Claude,
            env: Env::Dev,
            principal: None,
            workload: None,
        };
        let source = SourceInfo {
            host_id: "fixture-host".to_string(),
            proc_id: "4242".to_string(),
            shim_id: "fixture-shim".to_string(),
        };
        let started_at = base_ts();
        let mut stream = Self {
            run,
            source,
            policy: policy.clone(),
            mode,
            seq: 0,
            summary: RunSummary::default(),
            events: Vec::new(),
        };
        stream.push(
            started_at,
            EventPayload::RunStart {
                started_at,
                mode,
                policy,
            },
        );
        stream
    }

    /// Append a start / ALLOW decision / OK end trio. Returns the
    /// generated call id.
    pub fn allowed_call(&mut self, server: &str, tool: &str, args: Value) -> String {
        let (info, at) = self.begin_call(server, tool, &args);
        let call = CallRef::from(&info);
        let call_id = info.call_id.clone();
        let seq = self.seq;
        self.push(at, EventPayload::ToolCallStart { call: info, seq });
        self.push(
            at + chrono::Duration::milliseconds(1),
            EventPayload::ToolCallDecision {
                call: call.clone(),
                decision: self.decision(DecisionAction::Allow, None, "DEFAULT_ALLOW", None),
            },
        );
        self.push(
            at + chrono::Duration::milliseconds(5),
            EventPayload::ToolCallEnd {
                call,
                status: CallStatus::Ok,
                latency_ms: 4,
                bytes_out: 64,
                preview: ResultPreview {
                    truncated: false,
                    result_preview: "{\"ok\":true}".to_string(),
                },
                error: None,
            },
        );
        self.summary.calls_total += 1;
        self.summary.calls_allowed += 1;
        call_id
    }

    /// Append a start / enforced decision / synthesized ERROR end trio.
    pub fn blocked_call(
        &mut self,
        server: &str,
        tool: &str,
        args: Value,
        action: DecisionAction,
        rule_id: &str,
    ) -> String {
        let (info, at) = self.begin_call(server, tool, &args);
        let call = CallRef::from(&info);
        let call_id = info.call_id.clone();
        let seq = self.seq;
        let hint = (action == DecisionAction::RejectWithHint).then(|| Hint {
            hint_text: "try a narrower call".to_string(),
            hint_kind: Some("narrow".to_string()),
            suggested_args: Some(serde_json::json!({"limit": 5})),
            retry_advice: None,
        });
        self.push(at, EventPayload::ToolCallStart { call: info, seq });
        self.push(
            at + chrono::Duration::milliseconds(1),
            EventPayload::ToolCallDecision {
                call: call.clone(),
                decision: self.decision(action, Some(rule_id), "RULE_DENY", hint),
            },
        );
        self.push(
            at + chrono::Duration::milliseconds(2),
            EventPayload::ToolCallEnd {
                call,
                status: CallStatus::Error,
                latency_ms: 0,
                bytes_out: 128,
                preview: ResultPreview::default(),
                error: Some(ErrorDetail {
                    class: ErrorClass::PolicyBlock,
                    message: "Blocked by policy".to_string(),
                    code: action.rpc_error_code(),
                }),
            },
        );
        self.summary.calls_total += 1;
        if action == DecisionAction::Throttle {
            self.summary.calls_throttled += 1;
        } else {
            self.summary.calls_blocked += 1;
        }
        self.summary.errors_total += 1;
        call_id
    }

    /// Append a start / non-Allow decision / OK end trio: an
    /// observe-mode proxy records the computed decision but forwards
    /// the call, so it completes upstream and counts as allowed.
    pub fn observed_call(
        &mut self,
        server: &str,
        tool: &str,
        args: Value,
        action: DecisionAction,
        rule_id: &str,
    ) -> String {
        let (info, at) = self.begin_call(server, tool, &args);
        let call = CallRef::from(&info);
        let call_id = info.call_id.clone();
        let seq = self.seq;
        self.push(at, EventPayload::ToolCallStart { call: info, seq });
        self.push(
            at + chrono::Duration::milliseconds(1),
            EventPayload::ToolCallDecision {
                call: call.clone(),
                decision: self.decision(action, Some(rule_id), "RULE_DENY", None),
            },
        );
        self.push(
            at + chrono::Duration::milliseconds(5),
            EventPayload::ToolCallEnd {
                call,
                status: CallStatus::Ok,
                latency_ms: 4,
                bytes_out: 64,
                preview: ResultPreview {
                    truncated: false,
                    result_preview: "{\"ok\":true}".to_string(),
                },
                error: None,
            },
        );
        self.summary.calls_total += 1;
        self.summary.calls_allowed += 1;
        call_id
    }

    /// Append the closing `run_end` with the accumulated summary.
    pub fn end(&mut self, status: RunStatus) {
        let ended_at = self.next_ts();
        self.summary.duration_ms = (ended_at - base_ts()).num_milliseconds().max(0) as u64;
        let summary = self.summary;
        self.push(
            ended_at,
            EventPayload::RunEnd {
                ended_at,
                status,
                summary,
            },
        );
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// The stream as JSONL, one serialized line per event.
    pub fn jsonl(&self) -> String {
        self.events
            .iter()
            .map(|e| e.serialize_line().expect("fixture event serializes"))
            .collect()
    }

    fn begin_call(&mut self, server: &str, tool: &str, args: &Value) -> (CallInfo, DateTime<Utc>) {
        self.seq += 1;
        let at = self.next_ts();
        let preview = serde_json::to_string(args).expect("fixture args serialize");
        let info = CallInfo {
            call_id: format!("call-{:04}", self.seq),
            server_name: server.to_string(),
            tool_name: tool.to_string(),
            transport: "stdio".to_string(),
            args_hash: args_hash(args),
            args_stream_hash: None,
            bytes_in: preview.len() as u64 + 64,
            preview: ArgsPreview {
                truncated: false,
                args_preview: preview,
            },
        };
        (info, at)
    }

    fn decision(
        &self,
        action: DecisionAction,
        rule_id: Option<&str>,
        reason_code: &str,
        hint: Option<Hint>,
    ) -> Decision {
        Decision {
            action,
            rule_id: rule_id.map(|r| r.to_string()),
            severity: Severity::Info,
            explain: Explain {
                summary: "fixture decision".to_string(),
                reason_code: reason_code.to_string(),
            },
            policy: self.policy.clone(),
            backoff_ms: (action == DecisionAction::Throttle).then_some(1000),
            hint,
        }
    }

    fn next_ts(&self) -> DateTime<Utc> {
        base_ts() + chrono::Duration::milliseconds(self.events.len() as i64 * STEP_MS + STEP_MS)
    }

    fn push(&mut self, at: DateTime<Utc>, payload: EventPayload) {
        let event = Event::at(at, &self.run, &self.source, payload);
        self.events.push(event);
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }
}

fn base_ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}
