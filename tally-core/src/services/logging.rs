//! Logging service - structured reconciliation events in DuckDB
//!
//! Events are stored in events.duckdb, separate from the canonical store.
//! No user data (descriptions, amounts, bank names) is ever logged - only
//! event names, batch identifiers, counts, and error messages.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::migrations::EVENT_MIGRATIONS;
use crate::services::migration::MigrationService;

/// Counter for generating unique IDs within the same millisecond
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a unique ID based on timestamp + counter
fn generate_id() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    // Lower 48 bits of the timestamp, 16 bits of counter: 65536 unique IDs
    // per millisecond
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    (timestamp << 16) | counter
}

/// Current unix timestamp in milliseconds
fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A reconciliation event to be recorded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicates: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ReconcileEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            command: None,
            batch_id: None,
            source: None,
            accepted: None,
            duplicates: None,
            failed: None,
            error_message: None,
        }
    }

    /// Set the CLI command context
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    /// Attach batch identity and outcome counts
    pub fn with_batch(
        mut self,
        batch_id: impl Into<String>,
        accepted: i64,
        duplicates: i64,
        failed: i64,
    ) -> Self {
        self.batch_id = Some(batch_id.into());
        self.accepted = Some(accepted);
        self.duplicates = Some(duplicates);
        self.failed = Some(failed);
        self
    }

    /// Set the reporting source (statement/email/manual)
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Set error information
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// An event as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: u64,
    pub timestamp: i64,
    pub event: String,
    pub command: Option<String>,
    pub batch_id: Option<String>,
    pub source: Option<String>,
    pub accepted: Option<i64>,
    pub duplicates: Option<i64>,
    pub failed: Option<i64>,
    pub error_message: Option<String>,
}

/// Service for structured event logging
pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl LoggingService {
    /// Open or create events.duckdb in the tally directory and run any
    /// pending migrations
    pub fn new(tally_dir: &Path) -> Result<Self> {
        let db_path = tally_dir.join("events.duckdb");
        let conn = Connection::open(&db_path)?;
        MigrationService::new(&conn).run_pending(EVENT_MIGRATIONS)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Record an event
    pub fn log(&self, event: ReconcileEvent) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        conn.execute(
            r#"
            INSERT INTO sys_events (
                id, timestamp, event, command, batch_id, source,
                accepted, duplicates, failed, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                generate_id(),
                now_ms(),
                &event.event,
                &event.command,
                &event.batch_id,
                &event.source,
                &event.accepted,
                &event.duplicates,
                &event.failed,
                &event.error_message,
            ],
        )?;

        Ok(())
    }

    /// Query the most recent events, newest first
    pub fn get_recent(&self, limit: usize) -> Result<Vec<EventEntry>> {
        self.query_entries(
            "SELECT id, timestamp, event, command, batch_id, source,
                    accepted, duplicates, failed, error_message
             FROM sys_events
             ORDER BY timestamp DESC
             LIMIT ?",
            limit,
        )
    }

    /// Query the most recent events that carry an error, newest first
    pub fn get_errors(&self, limit: usize) -> Result<Vec<EventEntry>> {
        self.query_entries(
            "SELECT id, timestamp, event, command, batch_id, source,
                    accepted, duplicates, failed, error_message
             FROM sys_events
             WHERE error_message IS NOT NULL
             ORDER BY timestamp DESC
             LIMIT ?",
            limit,
        )
    }

    fn query_entries(&self, sql: &str, limit: usize) -> Result<Vec<EventEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;

        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map([limit as i64], |row| {
                Ok(EventEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    event: row.get(2)?,
                    command: row.get(3)?,
                    batch_id: row.get(4)?,
                    source: row.get(5)?,
                    accepted: row.get(6)?,
                    duplicates: row.get(7)?,
                    failed: row.get(8)?,
                    error_message: row.get(9)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(entries)
    }

    /// Total number of recorded events
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM sys_events", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete events older than the specified timestamp (unix ms)
    pub fn delete_before(&self, timestamp_ms: i64) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))?;
        let deleted = conn.execute("DELETE FROM sys_events WHERE timestamp < ?", [timestamp_ms])?;
        Ok(deleted as u64)
    }

    /// Path to the events database
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
