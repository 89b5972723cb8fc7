use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use subluminal_index::ToolCallRecord;

/// One aligned plain-text row per call, colored when stdout is a
/// terminal.
pub fn render_rows_plain(rows: &[ToolCallRecord]) {
    let color = std::io::stdout().is_terminal();
    for row in rows {
        println!("{}", render_row(row, color));
    }
}

fn render_row(row: &ToolCallRecord, color: bool) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let decision = opt(&row.decision);
    let status = opt(&row.status);
    let decision = if color {
        colorize_decision(&decision)
    } else {
        decision
    };
    let status = if color { colorize_status(&status) } else { status };
    format!(
        "{}  {:<12}  {:<24}/{:<20}  {:<18}  {:<8}  {:>6}ms  {}",
        opt(&row.created_at),
        &row.call_id[..row.call_id.len().min(12)],
        opt(&row.server_name),
        opt(&row.tool_name),
        decision,
        status,
        row.latency_ms.unwrap_or(-1),
        row.run_id,
    )
}

fn colorize_decision(decision: &str) -> String {
    match decision {
        "ALLOW" => decision.green().to_string(),
        "BLOCK" | "TERMINATE_RUN" => decision.red().to_string(),
        "THROTTLE" | "REJECT_WITH_HINT" => decision.yellow().to_string(),
        other => other.to_string(),
    }
}

fn colorize_status(status: &str) -> String {
    match status {
        "OK" => status.green().to_string(),
        "ERROR" | "TIMEOUT" => status.red().to_string(),
        "CANCELLED" => status.yellow().to_string(),
        other => other.to_string(),
    }
}
