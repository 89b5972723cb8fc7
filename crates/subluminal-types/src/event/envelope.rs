use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{Client, Env, RunInfo, SourceInfo, Workload};
use crate::{EVENT_VERSION, Result};

use super::payload::EventPayload;

/// One emitted event: envelope plus flattened payload.
///
/// The wire contract is a single `\n`-terminated JSON object per event
/// with no embedded newlines and no `\r` (see [`Event::serialize_line`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub v: u32,
    #[serde(with = "rfc3339_nanos")]
    pub ts: DateTime<Utc>,
    pub run_id: String,
    pub agent_id: String,
    pub client: Client,
    pub env: Env,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<Workload>,
    pub source: SourceInfo,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(run: &RunInfo, source: &SourceInfo, payload: EventPayload) -> Self {
        Self::at(Utc::now(), run, source, payload)
    }

    pub fn at(
        ts: DateTime<Utc>,
        run: &RunInfo,
        source: &SourceInfo,
        payload: EventPayload,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            ts,
            run_id: run.run_id.clone(),
            agent_id: run.agent_id.clone(),
            client: run.client,
            env: run.env,
            principal: run.principal.clone(),
            workload: run.workload.clone().filter(|w| !w.is_empty()),
            source: source.clone(),
            payload,
        }
    }

    /// Serialize to exactly one wire line: a JSON object followed by a
    /// single `\n`. serde_json escapes control characters, so the body
    /// can never contain a raw newline or carriage return.
    pub fn serialize_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

/// RFC3339 with fixed nanosecond precision, UTC `Z` suffix.
mod rfc3339_nanos {
    use super::*;
    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(
        ts: &DateTime<Utc>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::payload::{RunStatus, RunSummary};
    use crate::policy::{Mode, PolicyInfo};
    use chrono::TimeZone;

    fn run_info() -> RunInfo {
        RunInfo {
            run_id: "run-1".to_string(),
            agent_id: "agent-1".to_string(),
            client: Client::Claude,
            env: Env::Dev,
            principal: None,
            workload: None,
        }
    }

    fn source() -> SourceInfo {
        SourceInfo {
            host_id: "h".to_string(),
            proc_id: "1".to_string(),
            shim_id: "s".to_string(),
        }
    }

    fn sample_ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_serialize_line_is_single_terminated_line() {
        let event = Event::at(
            sample_ts(),
            &run_info(),
            &source(),
            EventPayload::RunStart {
                started_at: sample_ts(),
                mode: Mode::Observe,
                policy: PolicyInfo::none(),
            },
        );
        let line = event.serialize_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(!line.contains('\r'));
    }

    #[test]
    fn test_base_eight_fields_present() {
        let event = Event::at(
            sample_ts(),
            &run_info(),
            &source(),
            EventPayload::RunEnd {
                ended_at: sample_ts(),
                status: RunStatus::Succeeded,
                summary: RunSummary::default(),
            },
        );
        let value: serde_json::Value =
            serde_json::from_str(event.serialize_line().unwrap().trim_end()).unwrap();
        for field in ["v", "type", "ts", "run_id", "agent_id", "client", "env", "source"] {
            assert!(value.get(field).is_some(), "missing base field {}", field);
        }
        assert_eq!(value["type"], "run_end");
        assert_eq!(value["status"], "SUCCEEDED");
        // Optional identity fields are omitted when unset.
        assert!(value.get("principal").is_none());
        assert!(value.get("workload").is_none());
    }

    #[test]
    fn test_timestamp_has_nanosecond_precision() {
        let event = Event::at(
            sample_ts(),
            &run_info(),
            &source(),
            EventPayload::RunStart {
                started_at: sample_ts(),
                mode: Mode::Guardrails,
                policy: PolicyInfo::none(),
            },
        );
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        let ts = value["ts"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        let frac = ts.split('.').nth(1).unwrap();
        assert_eq!(frac.trim_end_matches('Z').len(), 9);
    }

    #[test]
    fn test_event_round_trips_through_line_form() {
        let event = Event::at(
            sample_ts(),
            &run_info(),
            &source(),
            EventPayload::RunEnd {
                ended_at: sample_ts(),
                status: RunStatus::Terminated,
                summary: RunSummary {
                    calls_total: 4,
                    calls_allowed: 3,
                    calls_blocked: 1,
                    calls_throttled: 0,
                    errors_total: 1,
                    duration_ms: 1234,
                },
            },
        );
        let line = event.serialize_line().unwrap();
        let back = Event::parse_line(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_newlines_in_payload_strings_are_escaped() {
        let mut run = run_info();
        run.agent_id = "agent\nwith\rnewlines".to_string();
        let event = Event::at(
            sample_ts(),
            &run,
            &source(),
            EventPayload::RunStart {
                started_at: sample_ts(),
                mode: Mode::Observe,
                policy: PolicyInfo::none(),
            },
        );
        let line = event.serialize_line().unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(!line.contains('\r'));
    }
}
