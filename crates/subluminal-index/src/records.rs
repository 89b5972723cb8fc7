use serde::{Deserialize, Serialize};

/// Row of the `runs` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub agent_id: Option<String>,
    pub client: Option<String>,
    pub env: Option<String>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub status: Option<String>,
    pub metadata_json: Option<String>,
}

/// Row of the `tool_calls` table. Inserts from different event types
/// collapse onto the same row; absent columns stay NULL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub run_id: String,
    pub server_name: Option<String>,
    pub tool_name: Option<String>,
    pub args_hash: Option<String>,
    pub decision: Option<String>,
    pub rule_id: Option<String>,
    pub status: Option<String>,
    pub latency_ms: Option<i64>,
    pub bytes_in: Option<i64>,
    pub bytes_out: Option<i64>,
    pub preview_truncated: bool,
    pub created_at: Option<String>,
}

impl ToolCallRecord {
    /// All column values joined with the unit separator; used by the
    /// tail loop to detect row updates.
    pub fn fingerprint(&self) -> String {
        const US: char = '\u{1f}';
        let mut out = String::new();
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        for part in [
            self.call_id.clone(),
            self.run_id.clone(),
            opt(&self.server_name),
            opt(&self.tool_name),
            opt(&self.args_hash),
            opt(&self.decision),
            opt(&self.rule_id),
            opt(&self.status),
            self.latency_ms.map(|v| v.to_string()).unwrap_or_default(),
            self.bytes_in.map(|v| v.to_string()).unwrap_or_default(),
            self.bytes_out.map(|v| v.to_string()).unwrap_or_default(),
            (self.preview_truncated as u8).to_string(),
            opt(&self.created_at),
        ] {
            if !out.is_empty() {
                out.push(US);
            }
            out.push_str(&part);
        }
        out
    }
}

/// Row of the `previews` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRecord {
    pub call_id: String,
    pub args_preview: Option<String>,
    pub result_preview: Option<String>,
    pub redaction_flags: Option<String>,
}

/// Row of the `hints` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintRecord {
    pub call_id: String,
    pub hint_text: Option<String>,
    pub suggested_args_json: Option<String>,
    pub created_at: Option<String>,
}

/// Row of the `policy_versions` table, keyed by (policy_id, version)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVersionRecord {
    pub policy_id: String,
    pub version: String,
    pub mode: Option<String>,
    pub rules_hash: Option<String>,
    pub rules_json: Option<String>,
    pub created_at: Option<String>,
}
