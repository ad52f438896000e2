//! Project command - live balances from checkpoints

use std::str::FromStr;

use anyhow::{anyhow, Result};
use colored::Colorize;

use tally_core::domain::{AccountKind, AccountRef};
use tally_core::services::{ProjectionOutcome, ReconcileEvent};

use super::{get_context, get_user_scope, log_event};
use crate::output;

pub async fn run(bank: Option<&str>, kind: Option<&str>, json: bool) -> Result<()> {
    let ctx = get_context()?;
    let user = get_user_scope()?;

    let kind_filter = kind
        .map(AccountKind::from_str)
        .transpose()
        .map_err(|e| anyhow!(e))?;

    if let Some(bank) = bank {
        let account = AccountRef::new(kind_filter.unwrap_or(AccountKind::BankAccount), bank);
        return project_single(&ctx, user, &account, json).await;
    }

    let report = ctx.projection_service.project_all(user, kind_filter).await?;
    for failure in &report.unavailable {
        log_event(
            &ctx,
            ReconcileEvent::new("projection_failed")
                .with_command("project")
                .with_error(failure.error.clone()),
        );
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.projected.is_empty() && report.unavailable.is_empty() {
        output::warning("No checkpointed accounts yet - record a checkpoint first");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Account", "Live balance", "Statement", "Replayed expenses"]);
    for projection in &report.projected {
        table.add_row(vec![
            projection.account.to_string(),
            projection.balance.to_string(),
            projection.statement_month.to_string(),
            projection.replayed_expenses.to_string(),
        ]);
    }
    println!("{table}");

    println!(
        "Bank total: {}   Credit card due: {}",
        report.bank_total.to_string().bold(),
        report.credit_card_total.to_string().bold()
    );
    println!(
        "{} account(s) projected, {} unavailable",
        report.projected.len(),
        report.unavailable.len()
    );
    for failure in &report.unavailable {
        output::error(&format!("  {}: {}", failure.account, failure.error));
    }

    Ok(())
}

async fn project_single(
    ctx: &tally_core::TallyContext,
    user: uuid::Uuid,
    account: &AccountRef,
    json: bool,
) -> Result<()> {
    let outcome = match ctx.projection_service.project_account(user, account).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_event(
                ctx,
                ReconcileEvent::new("projection_failed")
                    .with_command("project")
                    .with_error(e.to_string()),
            );
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        ProjectionOutcome::Projected(projection) => {
            println!(
                "{}: {} (from {} checkpoint, {} expense(s) replayed)",
                projection.account,
                projection.balance.to_string().bold(),
                projection.statement_month,
                projection.replayed_expenses
            );
        }
        // Unknown is not zero: say so instead of printing a number
        ProjectionOutcome::InsufficientData => {
            output::warning(&format!(
                "No checkpoint recorded for {account} yet - balance unknown"
            ));
        }
    }
    Ok(())
}
