//! Tally CLI - multi-source transaction reconciliation in your terminal

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{checkpoint, ingest, logs, project, status};

/// Tally - keep multi-source finance data consistent
#[derive(Parser)]
#[command(name = "tally", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show reconciliation status and summary
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a CSV of candidate transactions through deduplication
    Ingest {
        /// Path to CSV file
        file: PathBuf,
        /// Reporting source (statement, email, manual)
        #[arg(long)]
        source: String,
        /// Bank or card name the candidates belong to
        #[arg(long)]
        bank: String,
        /// Account kind (bank, card)
        #[arg(long, default_value = "bank")]
        kind: String,
        /// Saved statement profile for column mapping
        #[arg(long)]
        profile: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage statement checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: checkpoint::CheckpointCommands,
    },

    /// Project live balances from checkpoints
    Project {
        /// Bank or card name (projects every checkpointed account if omitted)
        #[arg(long)]
        bank: Option<String>,
        /// Account kind (bank, card)
        #[arg(long)]
        kind: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent reconciliation events
    Logs {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Only show events with errors
        #[arg(long)]
        errors: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Status { json } => status::run(json).await,
        Commands::Ingest {
            file,
            source,
            bank,
            kind,
            profile,
            json,
        } => ingest::run(&file, &source, &bank, &kind, profile.as_deref(), json).await,
        Commands::Checkpoint { command } => checkpoint::run(command).await,
        Commands::Project { bank, kind, json } => {
            project::run(bank.as_deref(), kind.as_deref(), json).await
        }
        Commands::Logs {
            limit,
            errors,
            json,
        } => logs::run(limit, errors, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("Error: {e:#}"));
            ExitCode::FAILURE
        }
    }
}
