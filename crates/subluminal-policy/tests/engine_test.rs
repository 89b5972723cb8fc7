//! Decision engine behavior: rule families, precedence, the mode dial,
//! selector gating, and state reset on reload.

use serde_json::json;
use std::time::{Duration, Instant};
use subluminal_policy::{CallInput, PolicyEngine, compile, parse_bundle_json, reason};
use subluminal_types::{Client, DecisionAction, Env, RunInfo, Severity, Workload};

fn identity() -> RunInfo {
    RunInfo {
        run_id: "run-1".to_string(),
        agent_id: "agent-1".to_string(),
        client: Client::Claude,
        env: Env::Dev,
        principal: None,
        workload: None,
    }
}

fn engine_from(json: &str) -> PolicyEngine {
    let bundle = compile(parse_bundle_json(json).unwrap()).unwrap();
    PolicyEngine::with_bundle(identity(), bundle)
}

fn input<'a>(tool: &'a str, args: &'a serde_json::Value, hash: &'a str) -> CallInput<'a> {
    CallInput {
        server_name: "srv",
        tool_name: tool,
        args_hash: hash,
        args,
    }
}

#[test]
fn no_bundle_defaults_to_allow() {
    let engine = PolicyEngine::new(identity());
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::Allow);
    assert_eq!(d.explain.reason_code, reason::DEFAULT_ALLOW);
    assert_eq!(d.policy.policy_id, "none");
}

#[test]
fn empty_bundle_default_allow_carries_policy_info() {
    let engine = engine_from(r#"{"policy_id":"p","policy_version":"3","mode":"guardrails"}"#);
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::Allow);
    assert_eq!(d.explain.reason_code, reason::DEFAULT_ALLOW);
    assert_eq!(d.policy.policy_id, "p");
    assert_eq!(d.policy.policy_version, "3");
    assert_eq!(d.policy.policy_hash.len(), 64);
}

#[test]
fn budget_blocks_after_limit() {
    // Guardrails budget: three calls pass, the fourth exceeds.
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"b1","kind":"budget","severity":"warn",
             "match":{"tool":"t"},
             "effect":{"scope":"tool","limit_calls":3}}
        ]}"#,
    );
    let args = json!({"x":1});
    for _ in 0..3 {
        let d = engine.decide(&input("t", &args, "h"));
        assert_eq!(d.action, DecisionAction::Allow);
    }
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::Block);
    assert_eq!(d.explain.reason_code, reason::BUDGET_EXCEEDED);
    assert_eq!(d.rule_id.as_deref(), Some("b1"));
    assert_eq!(d.severity, Severity::Warn);

    // A different tool does not share the scope=tool counter.
    let d = engine.decide(&input("other", &args, "h"));
    assert_eq!(d.action, DecisionAction::Allow);
}

#[test]
fn rate_limit_throttles_with_default_backoff() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"rl","kind":"rate_limit",
             "match":{"tool":"t"},
             "effect":{"scope":"tool","capacity":1,"refill_tokens":0,"refill_period_ms":1000}}
        ]}"#,
    );
    let args = json!({});
    let now = Instant::now();
    assert_eq!(
        engine.decide_at(&input("t", &args, "h"), now).action,
        DecisionAction::Allow
    );
    let d = engine.decide_at(&input("t", &args, "h"), now);
    assert_eq!(d.action, DecisionAction::Throttle);
    assert_eq!(d.explain.reason_code, reason::RATE_LIMITED);
    assert_eq!(d.backoff_ms, Some(1000));
}

#[test]
fn rate_limit_honors_explicit_backoff() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"rl","kind":"rate_limit",
             "match":{"tool":"t"},
             "effect":{"scope":"tool","capacity":1,"refill_tokens":0,"refill_period_ms":1000,"backoff_ms":250}}
        ]}"#,
    );
    let args = json!({});
    let now = Instant::now();
    engine.decide_at(&input("t", &args, "h"), now);
    let d = engine.decide_at(&input("t", &args, "h"), now);
    assert_eq!(d.backoff_ms, Some(250));
}

#[test]
fn dedupe_blocks_inside_window() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"dd","kind":"dedupe",
             "match":{"tool":"t"},
             "effect":{"scope":"tool","window_ms":60000}}
        ]}"#,
    );
    let args = json!({"q":"same"});
    let now = Instant::now();
    let first = engine.decide_at(&input("t", &args, "same-hash"), now);
    assert_eq!(first.action, DecisionAction::Allow);

    let second = engine.decide_at(
        &input("t", &args, "same-hash"),
        now + Duration::from_millis(100),
    );
    assert_eq!(second.action, DecisionAction::Block);
    assert_eq!(second.explain.reason_code, reason::DEDUPE_DUPLICATE);

    // Different args hash is not a duplicate.
    let other = engine.decide_at(
        &input("t", &args, "other-hash"),
        now + Duration::from_millis(200),
    );
    assert_eq!(other.action, DecisionAction::Allow);
}

#[test]
fn breaker_trips_and_wins_over_ordered_allow() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"al","kind":"allow","match":{"tool":"t"}},
            {"rule_id":"br","kind":"breaker",
             "match":{"tool":"t"},
             "effect":{"scope":"tool","repeat_threshold":3,"repeat_window_ms":60000}}
        ]}"#,
    );
    let args = json!({});
    let now = Instant::now();
    for i in 0..2 {
        let d = engine.decide_at(&input("t", &args, "h"), now + Duration::from_millis(i));
        assert_eq!(d.action, DecisionAction::Allow, "call {}", i);
        assert_eq!(d.rule_id.as_deref(), Some("al"));
    }
    let d = engine.decide_at(&input("t", &args, "h"), now + Duration::from_millis(10));
    assert_eq!(d.action, DecisionAction::Block);
    assert_eq!(d.explain.reason_code, reason::BREAKER_TRIPPED);
    assert_eq!(d.rule_id.as_deref(), Some("br"));
}

#[test]
fn breaker_terminate_run_action() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"br","kind":"breaker",
             "match":{"tool":"t"},
             "effect":{"scope":"tool","repeat_threshold":1,"repeat_window_ms":1000,"on_trip":"TERMINATE_RUN"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::TerminateRun);
}

#[test]
fn deny_rule_first_ordered_decision_wins() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"d1","kind":"deny","match":{"tool":"danger*"},
             "effect":{"message":"dangerous tools are disabled"}},
            {"rule_id":"a1","kind":"allow","match":{"tool":"*"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("dangerous", &args, "h"));
    assert_eq!(d.action, DecisionAction::Block);
    assert_eq!(d.rule_id.as_deref(), Some("d1"));
    assert_eq!(d.explain.summary, "dangerous tools are disabled");

    let d = engine.decide(&input("safe", &args, "h"));
    assert_eq!(d.action, DecisionAction::Allow);
    assert_eq!(d.rule_id.as_deref(), Some("a1"));
    assert_eq!(d.explain.reason_code, reason::RULE_ALLOW);
}

#[test]
fn control_mode_rewrites_block_to_hint() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"control","rules":[
            {"rule_id":"d1","kind":"deny","match":{"tool":"t"},
             "effect":{"message":"use the batch variant"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::RejectWithHint);
    let hint = d.hint.expect("hint is mandatory for REJECT_WITH_HINT");
    assert_eq!(hint.hint_text, "use the batch variant");
}

#[test]
fn reject_with_hint_fallback_text() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"d1","kind":"deny","match":{"tool":"t"},
             "effect":{"action":"REJECT_WITH_HINT"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::RejectWithHint);
    // No author hint and a default summary: summary is used as text.
    assert_eq!(d.hint.unwrap().hint_text, "Blocked by policy");
}

#[test]
fn hint_carries_suggested_args() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"d1","kind":"deny","match":{"tool":"t"},
             "effect":{"action":"REJECT_WITH_HINT","hint_text":"narrow the query",
                       "hint_kind":"narrow","suggested_args":{"limit":10},
                       "retry_advice":"retry with limit"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    let hint = d.hint.unwrap();
    assert_eq!(hint.hint_text, "narrow the query");
    assert_eq!(hint.suggested_args.unwrap()["limit"], 10);
    assert_eq!(hint.retry_advice.as_deref(), Some("retry with limit"));
}

#[test]
fn tag_rules_feed_risk_class_predicates() {
    // The deny only applies to calls tagged destructive by a prior tag
    // rule; declaration order matters.
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"tag1","kind":"tag","match":{"tool":"rm*"},
             "effect":{"risk_classes":["Destructive"]}},
            {"rule_id":"d1","kind":"deny","match":{"risk_classes":["destructive"]}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("rm-rf", &args, "h"));
    assert_eq!(d.action, DecisionAction::Block);

    let d = engine.decide(&input("ls", &args, "h"));
    assert_eq!(d.action, DecisionAction::Allow);
}

#[test]
fn disabled_rules_are_skipped() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"d1","kind":"deny","enabled":false,"match":{"tool":"t"}}
        ]}"#,
    );
    let args = json!({});
    assert_eq!(
        engine.decide(&input("t", &args, "h")).action,
        DecisionAction::Allow
    );
}

#[test]
fn errored_matcher_skips_rule_and_walk_continues() {
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"guardrails","rules":[
            {"rule_id":"bad","kind":"deny","match":{"tool_regex":"(["}},
            {"rule_id":"d2","kind":"deny","match":{"tool":"t"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::Block);
    assert_eq!(d.rule_id.as_deref(), Some("d2"));
}

#[test]
fn selectors_gate_the_whole_bundle() {
    let bundle = compile(
        parse_bundle_json(
            r#"{"policy_id":"p","mode":"guardrails",
                "selectors":{"env":["prod"]},
                "rules":[{"rule_id":"d1","kind":"deny","match":{"tool":"t"}}]}"#,
        )
        .unwrap(),
    )
    .unwrap();
    // Run is env=dev, selector wants prod: bundle does not apply.
    let engine = PolicyEngine::with_bundle(identity(), bundle);
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::Allow);
    assert_eq!(d.explain.reason_code, reason::POLICY_NOT_APPLICABLE);
}

#[test]
fn workload_selector_requires_submap_labels() {
    let bundle = compile(
        parse_bundle_json(
            r#"{"policy_id":"p","mode":"guardrails",
                "selectors":{"workload":{"namespace":"agents","labels":{"team":"ml"}}},
                "rules":[{"rule_id":"d1","kind":"deny","match":{"tool":"t"}}]}"#,
        )
        .unwrap(),
    )
    .unwrap();

    let mut id = identity();
    let mut labels = std::collections::BTreeMap::new();
    labels.insert("team".to_string(), "ml".to_string());
    labels.insert("extra".to_string(), "ok".to_string());
    id.workload = Some(Workload {
        namespace: Some("agents".to_string()),
        labels,
        ..Workload::default()
    });
    let engine = PolicyEngine::with_bundle(id, bundle.clone());
    let args = json!({});
    assert_eq!(
        engine.decide(&input("t", &args, "h")).action,
        DecisionAction::Block
    );

    // Missing label: not applicable.
    let engine = PolicyEngine::with_bundle(identity(), bundle);
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.explain.reason_code, reason::POLICY_NOT_APPLICABLE);
}

#[test]
fn reload_resets_budget_bucket_dedupe_breaker_state() {
    let json = r#"{"policy_id":"p","mode":"guardrails","rules":[
        {"rule_id":"b1","kind":"budget","match":{"tool":"t"},
         "effect":{"scope":"tool","limit_calls":1}}
    ]}"#;
    let engine = engine_from(json);
    let args = json!({});
    assert_eq!(
        engine.decide(&input("t", &args, "h")).action,
        DecisionAction::Allow
    );
    assert_eq!(
        engine.decide(&input("t", &args, "h")).action,
        DecisionAction::Block
    );

    // Reinstalling (reload) resets the counters: first post-reload
    // evaluation observes a zero budget count.
    engine.install(compile(parse_bundle_json(json).unwrap()).unwrap());
    assert_eq!(
        engine.decide(&input("t", &args, "h")).action,
        DecisionAction::Allow
    );
}

#[test]
fn observe_mode_reports_decision_unchanged() {
    // The dial does not alter the computed action in observe mode; the
    // caller is responsible for not enforcing it.
    let engine = engine_from(
        r#"{"policy_id":"p","mode":"observe","rules":[
            {"rule_id":"d1","kind":"deny","match":{"tool":"t"}}
        ]}"#,
    );
    let args = json!({});
    let d = engine.decide(&input("t", &args, "h"));
    assert_eq!(d.action, DecisionAction::Block);
}
