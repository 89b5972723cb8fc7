use std::path::PathBuf;
use subluminal_types::{RunInfo, Workload};
use uuid::Uuid;

/// Runtime configuration, read once at startup from `SUB_*` environment
/// variables. Identity is immutable for the run.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub identity: RunInfo,
    /// Logical name of the fronted server; defaults to the upstream
    /// command's basename when unset.
    pub server_name: Option<String>,
    /// Inline policy bundle (JSON)
    pub policy_inline: Option<String>,
    /// Path to a policy bundle file (JSON or YAML), watched for changes
    pub policy_path: Option<PathBuf>,
    pub secret_bindings_inline: Option<String>,
    pub secret_bindings_file: Option<PathBuf>,
    pub secrets_path: Option<PathBuf>,
    pub policy_debug: bool,
    pub secret_debug: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let run_id = non_empty_env("SUB_RUN_ID")
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let agent_id = non_empty_env("SUB_AGENT_ID").unwrap_or_else(|| "unknown".to_string());

        let mut identity = RunInfo::new(run_id, agent_id);
        if let Some(client) = non_empty_env("SUB_CLIENT") {
            identity.client = client.parse().unwrap_or_default();
        }
        if let Some(env) = non_empty_env("SUB_ENV") {
            identity.env = env.parse().unwrap_or_default();
        }
        identity.principal = non_empty_env("SUB_PRINCIPAL");
        identity.workload = non_empty_env("SUB_WORKLOAD")
            .and_then(|json| serde_json::from_str::<Workload>(&json).ok())
            .filter(|w| !w.is_empty());

        Self {
            identity,
            server_name: non_empty_env("SUB_SERVER_NAME"),
            policy_inline: non_empty_env("SUB_POLICY_JSON"),
            policy_path: non_empty_env("SUB_POLICY_PATH").map(PathBuf::from),
            secret_bindings_inline: non_empty_env("SUB_SECRET_BINDINGS"),
            secret_bindings_file: non_empty_env("SUB_SECRET_BINDINGS_FILE").map(PathBuf::from),
            secrets_path: non_empty_env("SUB_SECRETS_PATH").map(PathBuf::from),
            policy_debug: flag_env("SUB_POLICY_DEBUG"),
            secret_debug: flag_env("SUB_SECRET_DEBUG"),
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn flag_env(key: &str) -> bool {
    matches!(non_empty_env(key).as_deref(), Some(v) if v != "0" && !v.eq_ignore_ascii_case("false"))
}
