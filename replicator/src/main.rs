use clap::{Parser, Subcommand};

mod core;

/// Multi-source database table replicator.
#[derive(Debug, Parser)]
#[command(name = "replicator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Batch-load every table that is not yet incrementally active, or only
    /// the named tables.
    Batch {
        /// Target table names; empty means every non-active table.
        tables: Vec<String>,
    },
    /// Delete and reload the trailing window of refresh-enabled tables.
    RefreshRecent {
        /// Target table names; empty means every refresh-enabled table.
        tables: Vec<String>,
    },
    /// Continuously tail-sync every active table until interrupted.
    Increment,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::tracing::init_tracing();

    match cli.command {
        Command::Batch { tables } => core::batch(&tables).await,
        Command::RefreshRecent { tables } => core::refresh_recent(&tables).await,
        Command::Increment => core::increment().await,
    }
}
