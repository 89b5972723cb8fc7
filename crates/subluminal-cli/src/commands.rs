use anyhow::Result;
use clap::CommandFactory;

use crate::args::{Cli, Commands};
use crate::handlers;

pub fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Run {
            policy_file,
            ledger,
            command,
        } => handlers::run::handle(policy_file, ledger, command),

        Commands::Ingest { db, input, format } => handlers::ingest::handle(&db, &input, format),

        Commands::Query {
            db,
            filter,
            after,
            limit,
            offset,
            desc,
            format,
        } => handlers::query::handle(&db, filter, after, limit, offset, desc, format),

        Commands::Tail {
            db,
            filter,
            interval_ms,
            limit,
            format,
        } => handlers::tail::handle(&db, filter, interval_ms, limit, format),

        Commands::Export { db, run_id, format } => handlers::export::handle(&db, &run_id, format),
    }
}
