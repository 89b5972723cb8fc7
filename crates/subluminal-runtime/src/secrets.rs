use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::{Error, Result};

/// One secret binding: inject the referenced secret into the child
/// environment as `inject_as`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretBinding {
    pub inject_as: String,
    pub secret_ref: String,
    /// Where the value comes from: the file-backed store (default) or
    /// `"env"` for the adapter's own environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Opt out of redaction with `false`; defaults to redacting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redact: Option<bool>,
}

/// Bindings scoped to one server. `server_name` `"*"` applies to any
/// server (the bare-array input shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerBindings {
    pub server_name: String,
    #[serde(default)]
    pub secret_bindings: Vec<SecretBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEntry {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// File-backed secret store: a JSON map `ref -> {value, source,
/// updated_at}`.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    entries: HashMap<String, SecretEntry>,
}

impl SecretStore {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let entries: HashMap<String, SecretEntry> = serde_json::from_str(&text)?;
        Ok(Self { entries })
    }

    pub fn get(&self, secret_ref: &str) -> Option<&SecretEntry> {
        self.entries.get(secret_ref)
    }

    #[cfg(test)]
    pub fn insert(&mut self, secret_ref: &str, value: &str) {
        self.entries.insert(
            secret_ref.to_string(),
            SecretEntry {
                value: value.to_string(),
                source: None,
                updated_at: None,
            },
        );
    }
}

/// Outcome of resolving one binding. A missing secret yields
/// `success=false` and no environment entry; never an error.
#[derive(Debug, Clone)]
pub struct ResolvedBinding {
    pub server_name: String,
    pub inject_as: String,
    pub secret_ref: String,
    pub value: Option<String>,
    pub success: bool,
    pub redact: bool,
}

/// Parse secret bindings from any of the accepted input shapes:
/// a list of server-scoped entries, a single server object, a map of
/// `server_name -> [binding...]`, or a bare array of bindings.
pub fn parse_bindings(input: &str) -> Result<Vec<ServerBindings>> {
    let value: Value = serde_json::from_str(input)?;
    match &value {
        Value::Array(items) => {
            if items.is_empty() {
                return Ok(Vec::new());
            }
            if items[0].get("server_name").is_some() {
                Ok(serde_json::from_value(value)?)
            } else {
                let bindings: Vec<SecretBinding> = serde_json::from_value(value)?;
                Ok(vec![ServerBindings {
                    server_name: "*".to_string(),
                    secret_bindings: bindings,
                }])
            }
        }
        Value::Object(map) => {
            if map.contains_key("server_name") {
                Ok(vec![serde_json::from_value(value)?])
            } else {
                let mut out = Vec::new();
                for (server_name, bindings) in map {
                    let secret_bindings: Vec<SecretBinding> =
                        serde_json::from_value(bindings.clone())?;
                    out.push(ServerBindings {
                        server_name: server_name.clone(),
                        secret_bindings,
                    });
                }
                Ok(out)
            }
        }
        _ => Err(Error::Config(
            "secret bindings must be an object or array".to_string(),
        )),
    }
}

/// Resolve the bindings that apply to `server_name` against the store
/// (or the adapter environment for `source: "env"`).
pub fn resolve_bindings(
    bindings: &[ServerBindings],
    store: &SecretStore,
    server_name: &str,
    debug: bool,
) -> Vec<ResolvedBinding> {
    let mut out = Vec::new();
    for scope in bindings {
        if scope.server_name != "*" && scope.server_name != server_name {
            continue;
        }
        for binding in &scope.secret_bindings {
            let value = match binding.source.as_deref() {
                Some("env") => std::env::var(&binding.secret_ref).ok(),
                _ => store.get(&binding.secret_ref).map(|e| e.value.clone()),
            };
            let success = value.is_some();
            if !success && debug {
                eprintln!(
                    "subluminal: secret '{}' for {} not found; skipping injection",
                    binding.secret_ref, binding.inject_as
                );
            }
            out.push(ResolvedBinding {
                server_name: scope.server_name.clone(),
                inject_as: binding.inject_as.clone(),
                secret_ref: binding.secret_ref.clone(),
                value,
                success,
                redact: binding.redact.unwrap_or(true),
            });
        }
    }
    out
}

/// Environment entries to inject into the child process.
pub fn env_entries(resolved: &[ResolvedBinding]) -> Vec<(String, String)> {
    resolved
        .iter()
        .filter_map(|r| r.value.as_ref().map(|v| (r.inject_as.clone(), v.clone())))
        .collect()
}

/// Literal values the redactor must mask.
pub fn redact_values(resolved: &[ResolvedBinding]) -> Vec<String> {
    resolved
        .iter()
        .filter(|r| r.redact)
        .filter_map(|r| r.value.clone())
        .collect()
}
