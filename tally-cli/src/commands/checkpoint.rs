//! Checkpoint commands - record and inspect statement checkpoints

use std::str::FromStr;

use anyhow::{anyhow, Result};
use clap::Subcommand;
use colored::Colorize;
use rust_decimal::Decimal;
use uuid::Uuid;

use tally_core::domain::{AccountKind, AccountRef, StatementMonth};
use tally_core::services::{NewCheckpoint, ReconcileEvent};

use super::{get_context, get_user_scope, log_event};
use crate::output;

#[derive(Subcommand)]
pub enum CheckpointCommands {
    /// Record a checkpoint from a processed statement
    New {
        /// Bank or card name
        #[arg(long)]
        bank: String,
        /// Account kind (bank, card)
        #[arg(long, default_value = "bank")]
        kind: String,
        /// Statement month label with an explicit year, e.g. "May 2024"
        #[arg(long)]
        month: String,
        /// Resolve a bare legacy label like "May" against this year
        #[arg(long)]
        assume_year: Option<i32>,
        /// Closing balance (bank) or amount due (card)
        #[arg(long)]
        balance: Decimal,
        /// Transaction id already reflected in the balance
        #[arg(long)]
        last_transaction: Option<Uuid>,
        /// Statement batch id
        #[arg(long)]
        statement: Option<Uuid>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List checkpoints for an account, most recent first
    List {
        /// Bank or card name
        #[arg(long)]
        bank: String,
        /// Account kind (bank, card)
        #[arg(long, default_value = "bank")]
        kind: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(command: CheckpointCommands) -> Result<()> {
    match command {
        CheckpointCommands::New {
            bank,
            kind,
            month,
            assume_year,
            balance,
            last_transaction,
            statement,
            json,
        } => {
            new(
                &bank,
                &kind,
                &month,
                assume_year,
                balance,
                last_transaction,
                statement,
                json,
            )
            .await
        }
        CheckpointCommands::List { bank, kind, json } => list(&bank, &kind, json).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn new(
    bank: &str,
    kind: &str,
    month: &str,
    assume_year: Option<i32>,
    balance: Decimal,
    last_transaction: Option<Uuid>,
    statement: Option<Uuid>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let user = get_user_scope()?;

    let kind = AccountKind::from_str(kind).map_err(|e| anyhow!(e))?;
    let account = AccountRef::new(kind, bank);

    // Bare labels only resolve when the caller chooses the year explicitly
    let statement_month = match assume_year {
        Some(year) => StatementMonth::parse_legacy(month, year)?,
        None => StatementMonth::parse(month)?,
    };

    let checkpoint = ctx
        .checkpoint_service
        .record(
            user,
            NewCheckpoint {
                account: account.clone(),
                statement_month,
                balance,
                last_transaction_id: last_transaction,
                statement_id: statement,
            },
        )
        .await?;

    log_event(
        &ctx,
        ReconcileEvent::new("checkpoint_recorded").with_command("checkpoint new"),
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    output::success(&format!(
        "Recorded {} checkpoint for {}",
        checkpoint.statement_month, account
    ));
    Ok(())
}

async fn list(bank: &str, kind: &str, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let user = get_user_scope()?;

    let kind = AccountKind::from_str(kind).map_err(|e| anyhow!(e))?;
    let account = AccountRef::new(kind, bank);

    let checkpoints = ctx.checkpoint_service.list(user, &account).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&checkpoints)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        output::warning(&format!("No checkpoints recorded for {account}"));
        return Ok(());
    }

    println!("{}", format!("Checkpoints for {account}").bold());
    let mut table = output::create_table();
    table.set_header(vec!["Statement", "Balance", "Anchor transaction", "Recorded"]);
    for checkpoint in &checkpoints {
        table.add_row(vec![
            checkpoint.statement_month.to_string(),
            checkpoint.balance.to_string(),
            checkpoint
                .last_transaction_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            checkpoint.created_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}
