//! Logs command - show recent reconciliation events

use anyhow::Result;
use chrono::DateTime;

use super::get_context;
use crate::output;

pub fn run(limit: usize, errors: bool, json: bool) -> Result<()> {
    let ctx = get_context()?;

    let entries = if errors {
        ctx.logging_service.get_errors(limit)?
    } else {
        ctx.logging_service.get_recent(limit)?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        output::warning("No events recorded yet");
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["Time", "Event", "Source", "Accepted", "Duplicates", "Failed", "Error"]);
    for entry in &entries {
        let time = DateTime::from_timestamp_millis(entry.timestamp)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| entry.timestamp.to_string());
        table.add_row(vec![
            time,
            entry.event.clone(),
            entry.source.clone().unwrap_or_else(|| "-".to_string()),
            entry.accepted.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            entry.duplicates.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            entry.failed.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string()),
            entry.error_message.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}
