use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use subluminal_index::{Database, Tailer};

use crate::args::{FilterArgs, OutputFormat};
use crate::output;

pub fn handle(
    db_path: &Path,
    filter_args: FilterArgs,
    interval_ms: u64,
    limit: u64,
    format: OutputFormat,
) -> Result<()> {
    let db = Database::open(db_path)
        .with_context(|| format!("open ledger {}", db_path.display()))?;

    let mut filter = filter_args.into_filter();
    if let Some(run_id) = filter.run_id.take() {
        filter.run_id = Some(super::query::resolve_run_id(&db, &run_id)?);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        // Ctrl-C / SIGTERM exits the loop cleanly.
        let _ = ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        });
    }

    let interval = Duration::from_millis(interval_ms.max(50));
    let mut tailer = Tailer::new(&db, filter, limit);

    while running.load(Ordering::SeqCst) {
        let rows = tailer.poll()?;
        if !rows.is_empty() {
            match format {
                OutputFormat::Json => {
                    for row in &rows {
                        println!("{}", serde_json::to_string(row)?);
                    }
                }
                OutputFormat::Plain => output::render_rows_plain(&rows),
            }
        }
        std::thread::sleep(interval);
    }
    Ok(())
}
