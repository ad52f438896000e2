//! Status command - show reconciliation status and summary

use anyhow::Result;
use colored::Colorize;

use super::{get_context, get_user_scope};
use crate::output;

pub async fn run(json: bool) -> Result<()> {
    let ctx = get_context()?;
    let user = get_user_scope()?;
    let summary = ctx.status_service.summary(user).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "Reconciliation Status".bold());
    println!();

    let mut table = output::create_table();
    table.add_row(vec!["Transactions", &summary.total_transactions.to_string()]);
    table.add_row(vec!["Checkpoints", &summary.total_checkpoints.to_string()]);
    table.add_row(vec![
        "Checkpointed accounts",
        &summary.accounts.len().to_string(),
    ]);
    println!("{table}");

    if !summary.accounts.is_empty() {
        println!();
        let mut table = output::create_table();
        table.set_header(vec!["Account", "Checkpoints", "Latest statement"]);
        for account in &summary.accounts {
            table.add_row(vec![
                account.account.to_string(),
                account.checkpoint_count.to_string(),
                account
                    .latest_statement_month
                    .clone()
                    .unwrap_or_else(|| "-".to_string()),
            ]);
        }
        println!("{table}");
    }

    Ok(())
}
