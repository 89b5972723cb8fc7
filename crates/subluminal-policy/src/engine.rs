use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use subluminal_types::{
    BundleSpec, Decision, DecisionAction, EffectSpec, Explain, Hint, Mode, PolicyInfo, RuleKind,
    RunInfo, Selectors, Severity,
};

use crate::bundle::{CompiledBundle, CompiledRule};
use crate::reason;
use crate::state::{PolicyState, state_key};

/// One call presented for a decision.
#[derive(Debug, Clone, Copy)]
pub struct CallInput<'a> {
    pub server_name: &'a str,
    pub tool_name: &'a str,
    pub args_hash: &'a str,
    pub args: &'a Value,
}

struct ActiveBundle {
    bundle: Arc<CompiledBundle>,
    /// Selector gating, resolved once against the run identity
    applies: bool,
}

/// The stateful rule evaluator. Holds the active compiled bundle and
/// the per-run mutable containers; produces at most one decision per
/// call.
pub struct PolicyEngine {
    identity: RunInfo,
    active: RwLock<Option<ActiveBundle>>,
    state: PolicyState,
}

impl PolicyEngine {
    pub fn new(identity: RunInfo) -> Self {
        Self {
            identity,
            active: RwLock::new(None),
            state: PolicyState::new(),
        }
    }

    pub fn with_bundle(identity: RunInfo, bundle: Arc<CompiledBundle>) -> Self {
        let engine = Self::new(identity);
        engine.install(bundle);
        engine
    }

    /// Swap in a freshly compiled bundle and reset all per-run state.
    /// State never carries across policy versions.
    pub fn install(&self, bundle: Arc<CompiledBundle>) {
        let applies = selectors_apply(bundle.spec.selectors.as_ref(), &self.identity);
        if let Ok(mut guard) = self.active.write() {
            *guard = Some(ActiveBundle { bundle, applies });
        }
        self.state.reset();
    }

    /// Identity of the active bundle, or the `none` placeholder.
    pub fn policy_info(&self) -> PolicyInfo {
        match self.active.read() {
            Ok(guard) => guard
                .as_ref()
                .map(|a| a.bundle.info())
                .unwrap_or_else(PolicyInfo::none),
            Err(_) => PolicyInfo::none(),
        }
    }

    /// Enforcement mode of the active bundle; observe when none.
    pub fn mode(&self) -> Mode {
        match self.active.read() {
            Ok(guard) => guard
                .as_ref()
                .map(|a| a.bundle.spec.mode)
                .unwrap_or(Mode::Observe),
            Err(_) => Mode::Observe,
        }
    }

    /// The central operation: walk the rule list in declaration order
    /// and produce a single decision for the call.
    pub fn decide(&self, input: &CallInput<'_>) -> Decision {
        self.decide_at(input, Instant::now())
    }

    /// `decide` with an injected clock, for deterministic tests.
    pub fn decide_at(&self, input: &CallInput<'_>, now: Instant) -> Decision {
        let guard = match self.active.read() {
            Ok(guard) => guard,
            Err(_) => {
                return Decision::allow(
                    reason::POLICY_EVAL_ERROR,
                    "Policy evaluation failed",
                    PolicyInfo::none(),
                );
            }
        };
        let Some(active) = guard.as_ref() else {
            return Decision::allow(
                reason::DEFAULT_ALLOW,
                "No policy active",
                PolicyInfo::none(),
            );
        };
        let bundle = &active.bundle;
        let info = bundle.info();
        if !active.applies {
            return Decision::allow(
                reason::POLICY_NOT_APPLICABLE,
                "Policy selectors do not match this run",
                info,
            );
        }

        let decision = match self.walk(bundle, input, now) {
            Ok(decision) => decision.unwrap_or_else(|| {
                Decision::allow(reason::DEFAULT_ALLOW, "Allowed by default", info.clone())
            }),
            Err(()) => self.eval_error_decision(&bundle.spec, info.clone()),
        };
        finish(decision, bundle.spec.mode)
    }

    /// Single pass over the rules accumulating risk classes, at most
    /// one breaker candidate and at most one ordered candidate, with
    /// short-circuit returns from rate_limit and dedupe. A breaker
    /// decision wins over any ordered decision.
    fn walk(
        &self,
        bundle: &Arc<CompiledBundle>,
        input: &CallInput<'_>,
        now: Instant,
    ) -> std::result::Result<Option<Decision>, ()> {
        let info = bundle.info();
        let mut risk: BTreeSet<String> = BTreeSet::new();
        let mut breaker: Option<Decision> = None;
        let mut ordered: Option<Decision> = None;

        for rule in &bundle.rules {
            if !rule.spec.enabled {
                continue;
            }
            // Unbuildable matcher: skip the rule, keep walking.
            let Ok(matcher) = rule.matcher.as_ref() else {
                continue;
            };
            if !matcher.matches(input.server_name, input.tool_name, input.args, &risk) {
                continue;
            }

            let effect = &rule.spec.effect;
            match rule.spec.kind {
                RuleKind::Tag => {
                    risk.extend(effect.risk_classes.iter().map(|c| c.to_ascii_lowercase()));
                }
                RuleKind::Breaker => {
                    let key = hash_key(rule, input);
                    let window =
                        Duration::from_millis(effect.repeat_window_ms.unwrap_or(0));
                    let hits = self.state.breaker_hit(&key, window, now).map_err(|_| ())?;
                    let threshold = effect.repeat_threshold.unwrap_or(u64::MAX);
                    if hits as u64 >= threshold && breaker.is_none() {
                        let action = effect.on_trip.unwrap_or(DecisionAction::Block);
                        breaker = Some(candidate(
                            rule,
                            action,
                            reason::BREAKER_TRIPPED,
                            "Repeated identical call tripped breaker",
                            info.clone(),
                        ));
                    }
                }
                RuleKind::Budget => {
                    let key = plain_key(rule, input);
                    let count = self.state.budget_increment(&key).map_err(|_| ())?;
                    if count > effect.limit_calls.unwrap_or(u64::MAX) && ordered.is_none() {
                        let action = effect.on_exceed.unwrap_or(DecisionAction::Block);
                        ordered = Some(candidate(
                            rule,
                            action,
                            reason::BUDGET_EXCEEDED,
                            "Call budget exceeded",
                            info.clone(),
                        ));
                    }
                }
                RuleKind::RateLimit => {
                    let key = plain_key(rule, input);
                    let capacity = effect.capacity.unwrap_or(0.0);
                    let period =
                        Duration::from_millis(effect.refill_period_ms.unwrap_or(1000));
                    let ok = self
                        .state
                        .bucket_try_take(
                            &key,
                            capacity,
                            effect.refill_tokens.unwrap_or(0.0),
                            period,
                            effect.cost_tokens_per_call.unwrap_or(1.0),
                            now,
                        )
                        .map_err(|_| ())?;
                    if !ok {
                        let action = effect.on_limit.unwrap_or(DecisionAction::Throttle);
                        let mut decision = candidate(
                            rule,
                            action,
                            reason::RATE_LIMITED,
                            "Rate limit exceeded",
                            info.clone(),
                        );
                        if decision.action == DecisionAction::Throttle
                            && decision.backoff_ms.is_none()
                        {
                            decision.backoff_ms = Some(1000);
                        }
                        return Ok(Some(decision));
                    }
                }
                RuleKind::Dedupe => {
                    let key = hash_key(rule, input);
                    let window = Duration::from_millis(effect.window_ms.unwrap_or(0));
                    let duplicate =
                        self.state.dedupe_seen(&key, window, now).map_err(|_| ())?;
                    if duplicate {
                        let action = effect.on_duplicate.unwrap_or(DecisionAction::Block);
                        return Ok(Some(candidate(
                            rule,
                            action,
                            reason::DEDUPE_DUPLICATE,
                            "Duplicate call inside dedupe window",
                            info.clone(),
                        )));
                    }
                }
                RuleKind::Allow => {
                    if ordered.is_none() {
                        let action = effect.action.unwrap_or(DecisionAction::Allow);
                        ordered = Some(candidate(
                            rule,
                            action,
                            reason::RULE_ALLOW,
                            "Allowed by rule",
                            info.clone(),
                        ));
                    }
                }
                RuleKind::Deny => {
                    if ordered.is_none() {
                        let action = effect.action.unwrap_or(DecisionAction::Block);
                        ordered = Some(candidate(
                            rule,
                            action,
                            reason::RULE_DENY,
                            "Blocked by policy",
                            info.clone(),
                        ));
                    }
                }
            }
        }

        Ok(breaker.or(ordered))
    }

    fn eval_error_decision(&self, spec: &BundleSpec, info: PolicyInfo) -> Decision {
        Decision {
            action: spec.defaults.decision_on_error,
            rule_id: None,
            severity: Severity::Warn,
            explain: Explain {
                summary: "Policy evaluation failed".to_string(),
                reason_code: reason::POLICY_EVAL_ERROR.to_string(),
            },
            policy: info,
            backoff_ms: None,
            hint: None,
        }
    }
}

fn plain_key(rule: &CompiledRule, input: &CallInput<'_>) -> String {
    state_key(
        &rule.spec.rule_id,
        rule.spec.effect.scope,
        input.server_name,
        input.tool_name,
        None,
    )
}

fn hash_key(rule: &CompiledRule, input: &CallInput<'_>) -> String {
    state_key(
        &rule.spec.rule_id,
        rule.spec.effect.scope,
        input.server_name,
        input.tool_name,
        Some(input.args_hash),
    )
}

fn candidate(
    rule: &CompiledRule,
    action: DecisionAction,
    default_reason: &str,
    default_summary: &str,
    policy: PolicyInfo,
) -> Decision {
    let effect = &rule.spec.effect;
    let summary = effect
        .message
        .clone()
        .unwrap_or_else(|| default_summary.to_string());
    let reason_code = effect
        .reason_code
        .clone()
        .unwrap_or_else(|| default_reason.to_string());
    let hint = compose_hint(effect);
    Decision {
        action,
        rule_id: Some(rule.spec.rule_id.clone()),
        severity: rule.spec.severity,
        explain: Explain {
            summary,
            reason_code,
        },
        policy,
        backoff_ms: effect.backoff_ms,
        hint,
    }
}

fn compose_hint(effect: &EffectSpec) -> Option<Hint> {
    if effect.hint_text.is_none()
        && effect.hint_kind.is_none()
        && effect.suggested_args.is_none()
        && effect.retry_advice.is_none()
    {
        return None;
    }
    Some(Hint {
        hint_text: effect.hint_text.clone().unwrap_or_default(),
        hint_kind: effect.hint_kind.clone(),
        suggested_args: effect.suggested_args.clone(),
        retry_advice: effect.retry_advice.clone(),
    })
}

/// Apply the mode dial, then guarantee hint invariants. Runs on every
/// returned decision, including rate_limit/dedupe short circuits.
fn finish(mut decision: Decision, mode: Mode) -> Decision {
    if mode == Mode::Control && decision.action == DecisionAction::Block {
        decision.action = DecisionAction::RejectWithHint;
    }
    if decision.action == DecisionAction::RejectWithHint {
        let summary = decision.explain.summary.clone();
        let hint = decision.hint.get_or_insert_with(|| Hint {
            hint_text: String::new(),
            hint_kind: None,
            suggested_args: None,
            retry_advice: None,
        });
        if hint.hint_text.is_empty() {
            hint.hint_text = if summary.is_empty() {
                "Rejected with hint".to_string()
            } else {
                summary
            };
        }
    }
    decision
}

fn selectors_apply(selectors: Option<&Selectors>, identity: &RunInfo) -> bool {
    let Some(sel) = selectors else {
        return true;
    };
    if !sel.env.is_empty() && !sel.env.iter().any(|e| e == &identity.env.to_string()) {
        return false;
    }
    if !sel.agent_id.is_empty() && !sel.agent_id.iter().any(|a| a == &identity.agent_id) {
        return false;
    }
    if !sel.client.is_empty() && !sel.client.iter().any(|c| c == &identity.client.to_string()) {
        return false;
    }
    if let Some(wsel) = &sel.workload {
        let Some(workload) = &identity.workload else {
            return selector_workload_empty(wsel);
        };
        for (want, have) in [
            (&wsel.namespace, &workload.namespace),
            (&wsel.service_account, &workload.service_account),
            (&wsel.repo, &workload.repo),
            (&wsel.branch, &workload.branch),
        ] {
            if let Some(want) = want {
                if have.as_deref() != Some(want.as_str()) {
                    return false;
                }
            }
        }
        for (key, value) in &wsel.labels {
            if workload.labels.get(key) != Some(value) {
                return false;
            }
        }
    }
    true
}

fn selector_workload_empty(wsel: &subluminal_types::WorkloadSelector) -> bool {
    wsel.namespace.is_none()
        && wsel.service_account.is_none()
        && wsel.repo.is_none()
        && wsel.branch.is_none()
        && wsel.labels.is_empty()
}
