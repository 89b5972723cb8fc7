use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use subluminal_types::{BundleSpec, PolicyInfo, RuleKind, RuleSpec};

use crate::matcher::RuleMatcher;
use crate::{Error, Result};

/// One rule with its pre-built matcher. A matcher that failed to build
/// is kept as the error string and the rule is skipped at evaluation.
#[derive(Debug)]
pub struct CompiledRule {
    pub spec: RuleSpec,
    pub matcher: std::result::Result<RuleMatcher, String>,
}

/// An immutable compiled policy bundle.
#[derive(Debug)]
pub struct CompiledBundle {
    pub spec: BundleSpec,
    pub rules: Vec<CompiledRule>,
    /// Canonical bytes of the normalized snapshot the hash covers
    pub snapshot: Vec<u8>,
    pub hash: String,
}

impl CompiledBundle {
    pub fn info(&self) -> PolicyInfo {
        PolicyInfo {
            policy_id: self.spec.policy_id.clone(),
            policy_version: self.spec.policy_version.clone(),
            policy_hash: self.hash.clone(),
        }
    }
}

/// Parse an inline JSON bundle spec.
pub fn parse_bundle_json(input: &str) -> Result<BundleSpec> {
    Ok(serde_json::from_str(input)?)
}

/// Parse a bundle spec from text, YAML or JSON by flag.
pub fn parse_bundle_str(input: &str, yaml: bool) -> Result<BundleSpec> {
    if yaml {
        Ok(serde_yaml::from_str(input)?)
    } else {
        parse_bundle_json(input)
    }
}

/// Load and compile a bundle file. `.yaml`/`.yml` parse as YAML,
/// everything else as JSON.
pub fn load_bundle_file(path: &Path) -> Result<Arc<CompiledBundle>> {
    let text = std::fs::read_to_string(path)?;
    let yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let spec = parse_bundle_str(&text, yaml)?;
    compile(spec)
}

/// Lint and compile a bundle spec. The snapshot hash covers the
/// canonical form of the normalized spec, so re-serializations of the
/// same bundle hash identically.
pub fn compile(spec: BundleSpec) -> Result<Arc<CompiledBundle>> {
    lint(&spec)?;

    let snapshot_value = json!({
        "policy_id": spec.policy_id,
        "policy_version": spec.policy_version,
        "mode": spec.mode,
        "defaults": spec.defaults,
        "selectors": spec.selectors,
        "rules": spec.rules,
    });
    let snapshot = subluminal_core::canonicalize(&snapshot_value);
    let hash = subluminal_core::hash_bytes(&snapshot);

    let rules = spec
        .rules
        .iter()
        .map(|rule| CompiledRule {
            spec: rule.clone(),
            matcher: RuleMatcher::compile(&rule.match_spec),
        })
        .collect();

    Ok(Arc::new(CompiledBundle {
        spec,
        rules,
        snapshot,
        hash,
    }))
}

fn lint(spec: &BundleSpec) -> Result<()> {
    if spec.policy_id.trim().is_empty() {
        return Err(Error::Lint("policy_id must not be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for rule in &spec.rules {
        if rule.rule_id.trim().is_empty() {
            return Err(Error::Lint("rule_id must not be empty".to_string()));
        }
        if !seen.insert(rule.rule_id.as_str()) {
            return Err(Error::Lint(format!("duplicate rule_id '{}'", rule.rule_id)));
        }
        let effect = &rule.effect;
        match rule.kind {
            RuleKind::Budget if effect.limit_calls.is_none() => {
                return Err(Error::Lint(format!(
                    "budget rule '{}' requires limit_calls",
                    rule.rule_id
                )));
            }
            RuleKind::RateLimit if effect.capacity.is_none() => {
                return Err(Error::Lint(format!(
                    "rate_limit rule '{}' requires capacity",
                    rule.rule_id
                )));
            }
            RuleKind::Breaker
                if effect.repeat_threshold.is_none() || effect.repeat_window_ms.is_none() =>
            {
                return Err(Error::Lint(format!(
                    "breaker rule '{}' requires repeat_threshold and repeat_window_ms",
                    rule.rule_id
                )));
            }
            RuleKind::Dedupe if effect.window_ms.is_none() => {
                return Err(Error::Lint(format!(
                    "dedupe rule '{}' requires window_ms",
                    rule.rule_id
                )));
            }
            RuleKind::Tag if effect.risk_classes.is_empty() => {
                return Err(Error::Lint(format!(
                    "tag rule '{}' requires risk_classes",
                    rule.rule_id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}
