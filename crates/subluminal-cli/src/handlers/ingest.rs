use anyhow::{Context, Result};
use std::io::BufReader;
use std::path::Path;
use subluminal_index::{Database, ingest_reader};

use crate::args::OutputFormat;

pub fn handle(db_path: &Path, input: &str, format: OutputFormat) -> Result<()> {
    let mut db = Database::open(db_path)
        .with_context(|| format!("open ledger {}", db_path.display()))?;

    let report = if input == "-" {
        let stdin = std::io::stdin();
        ingest_reader(&mut db, stdin.lock())?
    } else {
        let file = std::fs::File::open(input).with_context(|| format!("open {}", input))?;
        ingest_reader(&mut db, BufReader::new(file))?
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            println!(
                "Ingested {} events ({} runs, {} calls, {} decisions, {} ends, {} skipped)",
                report.events,
                report.run_starts,
                report.call_starts,
                report.call_decisions,
                report.call_ends,
                report.skipped
            );
        }
    }
    Ok(())
}
