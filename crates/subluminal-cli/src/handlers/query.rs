use anyhow::{Context, Result};
use std::path::Path;
use subluminal_index::Database;

use crate::args::{FilterArgs, OutputFormat, parse_after_cursor};
use crate::output;

pub fn handle(
    db_path: &Path,
    filter_args: FilterArgs,
    after: Option<String>,
    limit: u64,
    offset: u64,
    desc: bool,
    format: OutputFormat,
) -> Result<()> {
    let db = Database::open(db_path)
        .with_context(|| format!("open ledger {}", db_path.display()))?;

    let mut filter = filter_args.into_filter();
    if let Some(run_id) = filter.run_id.take() {
        filter.run_id = Some(resolve_run_id(&db, &run_id)?);
    }
    if let Some(cursor) = after {
        filter.after = Some(parse_after_cursor(&cursor)?);
    }

    let rows = db.fetch_tool_calls(&filter, desc, Some(limit), Some(offset))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Plain => output::render_rows_plain(&rows),
    }
    Ok(())
}

/// Accept a full run id or a unique prefix.
pub(crate) fn resolve_run_id(db: &Database, run_id: &str) -> Result<String> {
    if db.get_run(run_id)?.is_some() {
        return Ok(run_id.to_string());
    }
    match db.find_run_by_prefix(run_id)? {
        Some(full) => Ok(full),
        None => Ok(run_id.to_string()),
    }
}
