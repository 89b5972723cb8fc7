use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum OutputFormat {
    Plain,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Plain => write!(f, "plain"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum ExportFormat {
    Jsonl,
    Json,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Jsonl => write!(f, "jsonl"),
            ExportFormat::Json => write!(f, "json"),
        }
    }
}

/// Shared tool-call filter flags for `query` and `tail`.
#[derive(Debug, Clone, clap::Args)]
pub struct FilterArgs {
    /// Restrict to one run (full id or unique prefix)
    #[arg(long)]
    pub run_id: Option<String>,

    /// Server name; glob when the value contains `*`, `?`, or `[`
    #[arg(long)]
    pub server: Option<String>,

    /// Tool name; glob when the value contains `*`, `?`, or `[`
    #[arg(long)]
    pub tool: Option<String>,

    /// Decision action (ALLOW, BLOCK, THROTTLE, REJECT_WITH_HINT, TERMINATE_RUN)
    #[arg(long)]
    pub decision: Option<String>,

    /// Call status (OK, ERROR, TIMEOUT, CANCELLED)
    #[arg(long)]
    pub status: Option<String>,

    /// Inclusive lower bound on created_at (RFC3339)
    #[arg(long)]
    pub since: Option<String>,
}

#[derive(Debug, Parser)]
#[command(
    name = "sub",
    version,
    about = "Policy-enforcing observability proxy for MCP tool calls"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the adapter: proxy an agent's stdio to an upstream MCP server
    Run {
        /// Policy bundle file (JSON or YAML); overrides SUB_POLICY_PATH
        #[arg(long)]
        policy_file: Option<PathBuf>,

        /// Append the emitted event stream to this JSONL file as well
        /// as stderr
        #[arg(long)]
        ledger: Option<PathBuf>,

        /// Upstream command and its arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Project a JSONL event stream into the ledger database
    Ingest {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,

        /// Input file, or '-' for stdin
        #[arg(default_value = "-")]
        input: String,

        #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
        format: OutputFormat,
    },

    /// Query tool calls in the ledger
    Query {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Keyset cursor 'CREATED_AT:CALL_ID': rows strictly after it
        #[arg(long)]
        after: Option<String>,

        #[arg(long, default_value_t = 50)]
        limit: u64,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Newest first
        #[arg(long)]
        desc: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
        format: OutputFormat,
    },

    /// Follow new and updated tool calls live
    Tail {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,

        #[command(flatten)]
        filter: FilterArgs,

        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Rows per poll window
        #[arg(long, default_value_t = 50)]
        limit: u64,

        #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
        format: OutputFormat,
    },

    /// Reconstruct a run's event stream from the ledger
    Export {
        /// Ledger database path
        #[arg(long)]
        db: PathBuf,

        /// Run id (full or unique prefix)
        #[arg(long)]
        run_id: String,

        #[arg(long, value_enum, default_value_t = ExportFormat::Jsonl)]
        format: ExportFormat,
    },
}

impl FilterArgs {
    pub fn into_filter(self) -> subluminal_index::ToolCallFilter {
        subluminal_index::ToolCallFilter {
            run_id: self.run_id,
            server: self.server,
            tool: self.tool,
            decision: self.decision,
            status: self.status,
            since_created_at: self.since,
            after: None,
        }
    }
}

/// Parse a `CREATED_AT:CALL_ID` cursor. The timestamp itself contains
/// colons, so the call id is everything after the last one.
pub fn parse_after_cursor(value: &str) -> anyhow::Result<(String, String)> {
    match value.rsplit_once(':') {
        Some((created_at, call_id)) if !created_at.is_empty() && !call_id.is_empty() => {
            Ok((created_at.to_string(), call_id.to_string()))
        }
        _ => anyhow::bail!(
            "invalid --after cursor '{}': expected CREATED_AT:CALL_ID",
            value
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_cursor_splits_on_last_colon() {
        let (created_at, call_id) =
            parse_after_cursor("2025-06-01T12:00:00.000000000Z:call-0003").unwrap();
        assert_eq!(created_at, "2025-06-01T12:00:00.000000000Z");
        assert_eq!(call_id, "call-0003");
    }

    #[test]
    fn test_after_cursor_rejects_malformed() {
        assert!(parse_after_cursor("no-colon-call").is_err());
        assert!(parse_after_cursor(":missing-ts").is_err());
        assert!(parse_after_cursor("missing-id:").is_err());
    }

    #[test]
    fn test_cli_parses_run_with_trailing_command() {
        let cli = Cli::try_parse_from([
            "sub", "run", "--ledger", "/tmp/x.jsonl", "--", "cat", "-u",
        ])
        .unwrap();
        match cli.command.unwrap() {
            Commands::Run { command, ledger, .. } => {
                assert_eq!(command, vec!["cat".to_string(), "-u".to_string()]);
                assert_eq!(ledger.unwrap().to_string_lossy(), "/tmp/x.jsonl");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cli_parses_query_filters() {
        let cli = Cli::try_parse_from([
            "sub", "query", "--db", "/tmp/l.db", "--tool", "read*", "--desc", "--limit", "5",
        ])
        .unwrap();
        match cli.command.unwrap() {
            Commands::Query {
                filter,
                desc,
                limit,
                ..
            } => {
                assert_eq!(filter.tool.as_deref(), Some("read*"));
                assert!(desc);
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
