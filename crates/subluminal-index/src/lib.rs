// SQLite ledger: relational projection of the emitted event stream.
// Upsert-based, so events may arrive out of order for the same call.

mod db;
mod error;
mod export;
mod ingest;
pub mod queries;
mod records;
mod schema;
mod tail;

pub use db::Database;
pub use error::{Error, Result};
pub use export::{RunMetadata, export_run};
pub use ingest::{IngestReport, ingest_lines, ingest_reader};
pub use queries::tool_call::{ToolCallFilter, build_tool_call_query};
pub use records::{
    HintRecord, PolicyVersionRecord, PreviewRecord, RunRecord, ToolCallRecord,
};
pub use tail::Tailer;
