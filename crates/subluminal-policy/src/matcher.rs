use globset::{Glob, GlobMatcher};
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use subluminal_types::{ArgsPredicate, MatchSpec};

/// Compiled name predicate: regex takes precedence over a glob for the
/// same field; globs with no metacharacters behave as exact matches.
#[derive(Debug)]
pub enum NameMatcher {
    Glob(GlobMatcher),
    Regex(Regex),
}

impl NameMatcher {
    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Glob(g) => g.is_match(name),
            NameMatcher::Regex(r) => r.is_match(name),
        }
    }
}

/// Compiled match predicate for one rule.
#[derive(Debug, Default)]
pub struct RuleMatcher {
    server: Option<NameMatcher>,
    tool: Option<NameMatcher>,
    risk_classes: Vec<String>,
    args: Option<ArgsPredicate>,
}

impl RuleMatcher {
    /// Build the matcher, or report why it cannot be built. A rule with
    /// an unbuildable matcher is skipped during evaluation.
    pub fn compile(spec: &MatchSpec) -> std::result::Result<Self, String> {
        let server = compile_name(spec.server_regex.as_deref(), spec.server.as_deref())
            .map_err(|e| format!("server predicate: {}", e))?;
        let tool = compile_name(spec.tool_regex.as_deref(), spec.tool.as_deref())
            .map_err(|e| format!("tool predicate: {}", e))?;
        Ok(Self {
            server,
            tool,
            risk_classes: spec
                .risk_classes
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
            args: spec.args.clone().filter(|a| !a.is_empty()),
        })
    }

    /// Evaluate the predicate against one call. `risk` is the set of
    /// classes accumulated from prior tag rules this walk.
    pub fn matches(
        &self,
        server_name: &str,
        tool_name: &str,
        args: &Value,
        risk: &BTreeSet<String>,
    ) -> bool {
        if let Some(m) = &self.server {
            if !m.matches(server_name) {
                return false;
            }
        }
        if let Some(m) = &self.tool {
            if !m.matches(tool_name) {
                return false;
            }
        }
        if !self.risk_classes.iter().all(|c| risk.contains(c)) {
            return false;
        }
        if let Some(pred) = &self.args {
            if !args_match(pred, args) {
                return false;
            }
        }
        true
    }
}

fn compile_name(
    regex: Option<&str>,
    glob: Option<&str>,
) -> std::result::Result<Option<NameMatcher>, String> {
    if let Some(pattern) = regex {
        let re = Regex::new(pattern).map_err(|e| e.to_string())?;
        return Ok(Some(NameMatcher::Regex(re)));
    }
    if let Some(pattern) = glob {
        let g = Glob::new(pattern).map_err(|e| e.to_string())?;
        return Ok(Some(NameMatcher::Glob(g.compile_matcher())));
    }
    Ok(None)
}

fn args_match(pred: &ArgsPredicate, args: &Value) -> bool {
    let Some(map) = args.as_object() else {
        // A non-object argument payload can never satisfy a predicate.
        return false;
    };
    for key in &pred.required_keys {
        if !map.contains_key(key) {
            return false;
        }
    }
    for (key, expected) in &pred.equals {
        if map.get(key) != Some(expected) {
            return false;
        }
    }
    for (key, allowed) in &pred.one_of {
        match map.get(key) {
            Some(value) if allowed.contains(value) => {}
            _ => return false,
        }
    }
    for (key, range) in &pred.range {
        let Some(n) = map.get(key).and_then(Value::as_f64) else {
            return false;
        };
        if let Some(min) = range.min {
            if n < min {
                return false;
            }
        }
        if let Some(max) = range.max {
            if n > max {
                return false;
            }
        }
    }
    true
}
