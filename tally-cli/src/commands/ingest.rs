//! Ingest command - run a CSV of candidate transactions through dedup

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use colored::Colorize;
use rust_decimal::Decimal;

use tally_core::config::ColumnMappings;
use tally_core::domain::{
    AccountKind, AccountRef, CandidateTransaction, TransactionKind, TransactionSource,
};
use tally_core::services::ReconcileEvent;

use super::{get_context, get_user_scope, log_event};
use crate::output;

pub async fn run(
    file: &Path,
    source: &str,
    bank: &str,
    kind: &str,
    profile: Option<&str>,
    json: bool,
) -> Result<()> {
    let ctx = get_context()?;
    let user = get_user_scope()?;

    let source = TransactionSource::from_str(source).map_err(|e| anyhow!(e))?;
    let kind = AccountKind::from_str(kind).map_err(|e| anyhow!(e))?;
    let account = AccountRef::new(kind, bank);

    let mappings = match profile {
        Some(name) => ctx
            .config
            .statement_profiles
            .get(name)
            .map(|p| p.columns.clone())
            .with_context(|| format!("No statement profile named {name:?}"))?,
        None => ColumnMappings::default(),
    };

    let (candidates, unparseable_rows) = read_candidates(file, &mappings, &account, source)?;
    if candidates.is_empty() {
        bail!("No parseable candidates in {:?}", file);
    }

    let report = ctx.ingest_service.ingest_batch(user, source, candidates).await;

    log_event(
        &ctx,
        ReconcileEvent::new("batch_ingested")
            .with_command("ingest")
            .with_source(source.as_str())
            .with_batch(
                report.batch_id.clone(),
                report.accepted as i64,
                report.duplicates as i64,
                report.failed as i64,
            ),
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", format!("Batch {}", report.batch_id).bold());
    let mut table = output::create_table();
    table.set_header(vec![
        "Discovered",
        "Accepted",
        "Duplicates",
        "Failed",
        "Rejected",
        "Unparseable rows",
    ]);
    table.add_row(vec![
        report.discovered.to_string(),
        report.accepted.to_string(),
        report.duplicates.to_string(),
        report.failed.to_string(),
        report.rejected.to_string(),
        unparseable_rows.to_string(),
    ]);
    println!("{table}");

    if report.failed > 0 {
        output::warning(&format!(
            "{} candidate(s) failed store lookups and are pending retry; \
             re-run the same file once the store recovers",
            report.failed
        ));
    } else {
        output::success(&format!("{} transaction(s) admitted", report.accepted));
    }

    Ok(())
}

fn read_candidates(
    file: &Path,
    mappings: &ColumnMappings,
    account: &AccountRef,
    source: TransactionSource,
) -> Result<(Vec<CandidateTransaction>, usize)> {
    let mut reader = csv::Reader::from_path(file).context("Failed to read CSV file")?;
    let headers = reader.headers()?.clone();

    let date_idx = headers
        .iter()
        .position(|h| h == mappings.date)
        .with_context(|| format!("Date column '{}' not found", mappings.date))?;
    let desc_idx = headers
        .iter()
        .position(|h| h == mappings.description)
        .with_context(|| format!("Description column '{}' not found", mappings.description))?;
    let amount_idx = headers
        .iter()
        .position(|h| h == mappings.amount)
        .with_context(|| format!("Amount column '{}' not found", mappings.amount))?;
    let kind_idx = mappings
        .kind
        .as_ref()
        .and_then(|k| headers.iter().position(|h| h == k));

    let mut candidates = Vec::new();
    let mut unparseable = 0usize;

    for record in reader.records() {
        let record = record?;

        let Some(date) = record.get(date_idx).and_then(parse_date) else {
            unparseable += 1;
            continue;
        };
        let Some(amount) = record.get(amount_idx).and_then(parse_amount) else {
            unparseable += 1;
            continue;
        };
        let description =
            CandidateTransaction::normalize_description(record.get(desc_idx).unwrap_or(""));
        // Rows default to expense when the CSV carries no kind column
        let kind = kind_idx
            .and_then(|i| record.get(i))
            .and_then(|s| TransactionKind::from_str(s).ok())
            .unwrap_or(TransactionKind::Expense);

        candidates.push(CandidateTransaction {
            date,
            description,
            amount,
            kind,
            account: account.clone(),
            source,
            statement_id: None,
        });
    }

    Ok((candidates, unparseable))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let formats = ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%Y/%m/%d"];
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s.trim(), fmt).ok())
}

fn parse_amount(s: &str) -> Option<Decimal> {
    // Strip currency symbols, commas, whitespace
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let amount: Decimal = cleaned.parse().ok()?;

    // Candidates carry positive magnitudes; statement exports often sign
    // their expenses
    Some(amount.abs())
}
