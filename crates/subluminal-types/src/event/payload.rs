use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{Decision, Mode, PolicyInfo};

/// Terminal status of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Ok => write!(f, "OK"),
            CallStatus::Error => write!(f, "ERROR"),
            CallStatus::Timeout => write!(f, "TIMEOUT"),
            CallStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Terminated,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Succeeded => write!(f, "SUCCEEDED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Terminated => write!(f, "TERMINATED"),
            RunStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Error taxonomy surfaced on `tool_call_end.error.class`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    UpstreamError,
    PolicyBlock,
    Timeout,
    Transport,
    Unknown,
}

/// Error detail attached to a failed call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub class: ErrorClass,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

/// Bounded reproduction of the call arguments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgsPreview {
    pub truncated: bool,
    pub args_preview: String,
}

/// Bounded reproduction of the call result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPreview {
    pub truncated: bool,
    pub result_preview: String,
}

/// Full call descriptor carried on `tool_call_start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInfo {
    pub call_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub transport: String,
    pub args_hash: String,
    /// Present only when the inspected payload was truncated by size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_stream_hash: Option<String>,
    pub bytes_in: u64,
    pub preview: ArgsPreview,
}

/// Compact call reference carried on decision/end events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRef {
    pub call_id: String,
    pub server_name: String,
    pub tool_name: String,
    pub args_hash: String,
}

impl From<&CallInfo> for CallRef {
    fn from(info: &CallInfo) -> Self {
        Self {
            call_id: info.call_id.clone(),
            server_name: info.server_name.clone(),
            tool_name: info.tool_name.clone(),
            args_hash: info.args_hash.clone(),
        }
    }
}

/// Run summary counters, final values reported on `run_end`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub calls_total: u64,
    pub calls_allowed: u64,
    pub calls_blocked: u64,
    pub calls_throttled: u64,
    pub errors_total: u64,
    pub duration_ms: u64,
}

/// Event payload variants. The tag lands on the envelope as `type`;
/// payload fields are flattened to the top level of the wire object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    RunStart {
        started_at: DateTime<Utc>,
        mode: Mode,
        policy: PolicyInfo,
    },
    ToolCallStart {
        call: CallInfo,
        seq: u64,
    },
    ToolCallDecision {
        call: CallRef,
        decision: Decision,
    },
    ToolCallEnd {
        call: CallRef,
        status: CallStatus,
        latency_ms: i64,
        bytes_out: u64,
        preview: ResultPreview,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<ErrorDetail>,
    },
    RunEnd {
        ended_at: DateTime<Utc>,
        status: RunStatus,
        summary: RunSummary,
    },
}

impl EventPayload {
    /// Previewable events may have their previews stripped under load.
    pub fn is_previewable(&self) -> bool {
        matches!(
            self,
            EventPayload::ToolCallStart { .. } | EventPayload::ToolCallEnd { .. }
        )
    }

    /// Drop preview text and force the truncated flag. No-op for
    /// non-previewable payloads.
    pub fn strip_preview(&mut self) {
        match self {
            EventPayload::ToolCallStart { call, .. } => {
                call.preview.args_preview.clear();
                call.preview.truncated = true;
            }
            EventPayload::ToolCallEnd { preview, .. } => {
                preview.result_preview.clear();
                preview.truncated = true;
            }
            _ => {}
        }
    }
}
