use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Agent client that launched the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Client {
    Claude,
    Codex,
    Headless,
    Custom,
    Unknown,
}

impl Default for Client {
    fn default() -> Self {
        Client::Unknown
    }
}

impl FromStr for Client {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "claude" => Client::Claude,
            "codex" => Client::Codex,
            "headless" => Client::Headless,
            "custom" => Client::Custom,
            _ => Client::Unknown,
        })
    }
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Client::Claude => write!(f, "claude"),
            Client::Codex => write!(f, "codex"),
            Client::Headless => write!(f, "headless"),
            Client::Custom => write!(f, "custom"),
            Client::Unknown => write!(f, "unknown"),
        }
    }
}

/// Deployment environment of the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Env {
    Dev,
    Ci,
    Prod,
    Unknown,
}

impl Default for Env {
    fn default() -> Self {
        Env::Unknown
    }
}

impl FromStr for Env {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "dev" => Env::Dev,
            "ci" => Env::Ci,
            "prod" => Env::Prod,
            _ => Env::Unknown,
        })
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Env::Dev => write!(f, "dev"),
            Env::Ci => write!(f, "ci"),
            Env::Prod => write!(f, "prod"),
            Env::Unknown => write!(f, "unknown"),
        }
    }
}

/// Workload descriptor attached to a run (deployment coordinates)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
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

impl Workload {
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none()
            && self.service_account.is_none()
            && self.repo.is_none()
            && self.branch.is_none()
            && self.labels.is_empty()
    }
}

/// Immutable identity of a run. Fixed at startup, carried on every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub agent_id: String,
    pub client: Client,
    pub env: Env,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<Workload>,
}

impl RunInfo {
    pub fn new(run_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: agent_id.into(),
            client: Client::Unknown,
            env: Env::Unknown,
            principal: None,
            workload: None,
        }
    }
}

/// Per-process source triple, generated fresh at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub host_id: String,
    pub proc_id: String,
    pub shim_id: String,
}

impl SourceInfo {
    /// Generate the source triple for this process.
    pub fn generate() -> Self {
        Self {
            host_id: hostname(),
            proc_id: std::process::id().to_string(),
            shim_id: Uuid::new_v4().to_string(),
        }
    }
}

#[cfg(unix)]
fn hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        if let Ok(name) = std::str::from_utf8(&buf[..end]) {
            if !name.is_empty() {
                return name.to_string();
            }
        }
    }
    fallback_hostname()
}

#[cfg(not(unix))]
fn hostname() -> String {
    fallback_hostname()
}

fn fallback_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
