use anyhow::{Context, Result};
use std::path::Path;
use subluminal_index::{Database, export_run};

use crate::args::ExportFormat;

pub fn handle(db_path: &Path, run_id: &str, format: ExportFormat) -> Result<()> {
    let db = Database::open(db_path)
        .with_context(|| format!("open ledger {}", db_path.display()))?;

    let run_id = super::query::resolve_run_id(&db, run_id)?;
    let events = export_run(&db, &run_id)?;

    match format {
        ExportFormat::Jsonl => {
            for event in &events {
                print!("{}", event.serialize_line()?);
            }
        }
        ExportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
    }
    Ok(())
}
