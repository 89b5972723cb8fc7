use serde_json::{Value, json};
use subluminal_types::{Decision, PolicyInfo, RunInfo};

/// Normalised JSON-RPC request id.
///
/// Generic decoders may parse integer-valued numeric ids as floats;
/// request and response must hash to the same pending-call slot, so
/// integer-valued floats fold to `Int`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RpcId {
    Int(i64),
    Str(String),
}

impl RpcId {
    /// Normalise a wire id. Notifications (absent id) return `None`;
    /// so do non-addressable ids (null, objects).
    pub fn normalize(value: &Value) -> Option<RpcId> {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    return Some(RpcId::Int(i));
                }
                if let Some(f) = n.as_f64() {
                    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                        return Some(RpcId::Int(f as i64));
                    }
                    return Some(RpcId::Str(n.to_string()));
                }
                Some(RpcId::Str(n.to_string()))
            }
            Value::String(s) => Some(RpcId::Str(s.clone())),
            _ => None,
        }
    }
}

/// A parsed agent or upstream line. Lines that do not parse as a JSON
/// object are forwarded untouched.
#[derive(Debug)]
pub struct RpcLine {
    pub value: Value,
}

impl RpcLine {
    pub fn parse(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        value.is_object().then_some(Self { value })
    }

    pub fn method(&self) -> Option<&str> {
        self.value.get("method").and_then(Value::as_str)
    }

    pub fn id(&self) -> Option<&Value> {
        self.value.get("id")
    }

    pub fn normalized_id(&self) -> Option<RpcId> {
        self.id().and_then(RpcId::normalize)
    }

    pub fn params(&self) -> Option<&Value> {
        self.value.get("params")
    }
}

/// Parsed `tools/call` params. `arguments` is normalised: null or
/// absent becomes `{}`.
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

impl ToolCallParams {
    pub fn from_line(line: &RpcLine) -> Option<Self> {
        let params = line.params()?.as_object()?;
        let name = params.get("name")?.as_str()?.to_string();
        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(other) => other.clone(),
        };
        Some(Self { name, arguments })
    }
}

/// Synthesize the JSON-RPC error response for an enforced decision,
/// carrying the `data.subluminal` envelope.
pub fn policy_error_response(
    id: &Value,
    code: i64,
    decision: &Decision,
    run: &RunInfo,
    call_id: &str,
    server_name: &str,
    tool_name: &str,
    args_hash: &str,
    policy: &PolicyInfo,
) -> Value {
    let mut subluminal = json!({
        "v": 1,
        "action": decision.action,
        "rule_id": decision.rule_id,
        "reason_code": decision.explain.reason_code,
        "summary": decision.explain.summary,
        "run_id": run.run_id,
        "call_id": call_id,
        "server_name": server_name,
        "tool_name": tool_name,
        "args_hash": args_hash,
        "policy": policy,
    });
    if let Some(backoff_ms) = decision.backoff_ms {
        subluminal["backoff_ms"] = json!(backoff_ms);
    }
    if let Some(hint) = &decision.hint {
        subluminal["hint"] = json!(hint);
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": decision.explain.summary,
            "data": { "subluminal": subluminal }
        }
    })
}
