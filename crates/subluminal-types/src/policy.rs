use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Enforcement dial for a policy bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Emit decision events, never enforce
    Observe,
    /// Emit and enforce exactly as decided
    Guardrails,
    /// Emit and enforce, but soft-reject (hint) instead of hard-block
    Control,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Observe
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "observe" => Ok(Mode::Observe),
            "guardrails" => Ok(Mode::Guardrails),
            "control" => Ok(Mode::Control),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Observe => write!(f, "observe"),
            Mode::Guardrails => write!(f, "guardrails"),
            Mode::Control => write!(f, "control"),
        }
    }
}

/// Outcome of a policy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionAction {
    Allow,
    Block,
    Throttle,
    RejectWithHint,
    TerminateRun,
}

impl DecisionAction {
    /// JSON-RPC error code synthesized for an enforced non-ALLOW decision.
    pub fn rpc_error_code(&self) -> Option<i64> {
        match self {
            DecisionAction::Allow => None,
            DecisionAction::Block => Some(-32081),
            DecisionAction::Throttle => Some(-32082),
            DecisionAction::RejectWithHint => Some(-32083),
            DecisionAction::TerminateRun => Some(-32084),
        }
    }
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAction::Allow => write!(f, "ALLOW"),
            DecisionAction::Block => write!(f, "BLOCK"),
            DecisionAction::Throttle => write!(f, "THROTTLE"),
            DecisionAction::RejectWithHint => write!(f, "REJECT_WITH_HINT"),
            DecisionAction::TerminateRun => write!(f, "TERMINATE_RUN"),
        }
    }
}

/// Severity attached to a rule and its decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Info
    }
}

/// Keying discipline for stateful rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Run,
    Tool,
    ServerTool,
}

impl Default for Scope {
    fn default() -> Self {
        Scope::Run
    }
}

/// Identity of the active policy bundle, stamped on events and errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub policy_id: String,
    pub policy_version: String,
    pub policy_hash: String,
}

impl PolicyInfo {
    /// Placeholder identity used when no bundle is active.
    pub fn none() -> Self {
        Self {
            policy_id: "none".to_string(),
            policy_version: "0".to_string(),
            policy_hash: String::new(),
        }
    }
}

/// Human/agent-facing explanation of a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explain {
    pub summary: String,
    pub reason_code: String,
}

/// Structured retry guidance attached to REJECT_WITH_HINT decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub hint_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_advice: Option<String>,
}

/// The at-most-one decision produced for a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub explain: Explain,
    pub policy: PolicyInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<Hint>,
}

impl Decision {
    pub fn allow(reason_code: &str, summary: &str, policy: PolicyInfo) -> Self {
        Self {
            action: DecisionAction::Allow,
            rule_id: None,
            severity: Severity::Info,
            explain: Explain {
                summary: summary.to_string(),
                reason_code: reason_code.to_string(),
            },
            policy,
            backoff_ms: None,
            hint: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Bundle spec (authoring surface, deserialized from JSON or YAML)
// ---------------------------------------------------------------------------

/// Bundle-wide evaluation defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defaults {
    /// Action returned when evaluation itself fails
    #[serde(default = "default_decision_on_error")]
    pub decision_on_error: DecisionAction,
    /// Whether read-class tools fail open on evaluation errors
    #[serde(default)]
    pub fail_open_read_tools: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            decision_on_error: default_decision_on_error(),
            fail_open_read_tools: false,
        }
    }
}

fn default_decision_on_error() -> DecisionAction {
    DecisionAction::Allow
}

/// Workload selector: every specified field must match the run's workload,
/// and `labels` must be a submap of the run's labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Gate for the entire bundle: empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selectors {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent_id: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub client: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadSelector>,
}

/// Rule families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Allow,
    Deny,
    Budget,
    RateLimit,
    Breaker,
    Dedupe,
    Tag,
}

/// Inclusive numeric range predicate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Argument predicate: all specified conditions must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArgsPredicate {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub equals: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub one_of: BTreeMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub range: BTreeMap<String, NumRange>,
}

impl ArgsPredicate {
    pub fn is_empty(&self) -> bool {
        self.required_keys.is_empty()
            && self.equals.is_empty()
            && self.one_of.is_empty()
            && self.range.is_empty()
    }
}

/// Match predicate for a rule. Glob fields accept `*`, `?`, `[...]`;
/// regex fields take precedence over the glob for the same name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_regex: Option<String>,
    /// Risk classes that must already be in the accumulated set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risk_classes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<ArgsPredicate>,
}

/// Effect of a rule. One flat bag of optionals; which fields apply is
/// determined by the rule kind (lint rejects nonsensical combinations).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EffectSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub scope: Scope,

    // allow/deny: optional action override (deny may soft-reject)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<DecisionAction>,

    // tag
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub risk_classes: Vec<String>,

    // budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_calls: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_exceed: Option<DecisionAction>,

    // rate_limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_tokens: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_period_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_tokens_per_call: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_limit: Option<DecisionAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,

    // breaker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_threshold: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_trip: Option<DecisionAction>,

    // dedupe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_duplicate: Option<DecisionAction>,

    // hint composition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_advice: Option<String>,
}

/// A single rule in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub rule_id: String,
    pub kind: RuleKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, rename = "match")]
    pub match_spec: MatchSpec,
    #[serde(default)]
    pub effect: EffectSpec,
}

fn default_enabled() -> bool {
    true
}

/// A policy bundle as authored. Immutable once compiled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSpec {
    pub policy_id: String,
    #[serde(default = "default_policy_version")]
    pub policy_version: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Selectors>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

fn default_policy_version() -> String {
    "1".to_string()
}
