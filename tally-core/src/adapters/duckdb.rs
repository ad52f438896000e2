//! DuckDB store implementation

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use duckdb::{params, Connection, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{
    AccountKind, AccountRef, BalanceCheckpoint, CandidateTransaction, StatementMonth, Transaction,
    TransactionKind, TransactionSource,
};
use crate::migrations::MIGRATIONS;
use crate::ports::{InsertOutcome, TransactionStore};
use crate::services::MigrationService;

/// Maximum number of retries when the database file is locked
const MAX_OPEN_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue worth retrying
fn is_retryable_open_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("file is already open")
}

/// Check if an error message is the dedup-key uniqueness constraint firing
fn is_unique_violation(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    lower.contains("duplicate key") || lower.contains("unique constraint")
}

/// DuckDB-backed canonical transaction store
pub struct DuckDbStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl DuckDbStore {
    /// Open (or create) the store database.
    ///
    /// Includes retry logic with exponential backoff for file locking
    /// errors, which occur when multiple processes touch the database
    /// simultaneously (e.g., a sync job racing CLI startup).
    pub fn new(db_path: &Path) -> anyhow::Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_OPEN_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: db_path.to_path_buf(),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_open_error(&err_msg) && attempt < MAX_OPEN_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        eprintln!(
                            "[tally] Database busy, retrying in {}ms (attempt {}/{}): {}",
                            delay.as_millis(),
                            attempt + 1,
                            MAX_OPEN_RETRIES,
                            err_msg
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("Failed to open database after {} retries", MAX_OPEN_RETRIES)
        }))
    }

    fn try_open_connection(db_path: &Path) -> anyhow::Result<Connection> {
        // Disable extension autoloading to avoid macOS code signing issues
        // (cached extensions in ~/.duckdb/extensions may have different
        // Team IDs)
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        Ok(conn)
    }

    /// Ensure database schema exists (runs pending migrations)
    pub fn ensure_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        MigrationService::new(&conn).run_pending(MIGRATIONS)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

const TRANSACTION_COLUMNS: &str = "transaction_id, user_id, tx_date, description, amount, kind,
     account_kind, bank_name, source, statement_id, created_at";

const CHECKPOINT_COLUMNS: &str = "checkpoint_id, user_id, account_kind, bank_name,
     statement_year, statement_month, balance, last_transaction_id, statement_id, created_at";

/// Map a row to a transaction. Returns None for rows that no longer parse;
/// they are skipped rather than failing the whole query.
fn row_to_transaction(row: &Row) -> Option<Transaction> {
    let id: String = row.get(0).ok()?;
    let user_id: String = row.get(1).ok()?;
    let tx_date: String = row.get(2).ok()?;
    let description: String = row.get(3).ok()?;
    let amount: String = row.get(4).ok()?;
    let kind: String = row.get(5).ok()?;
    let account_kind: String = row.get(6).ok()?;
    let bank_name: String = row.get(7).ok()?;
    let source: String = row.get(8).ok()?;
    let statement_id: Option<String> = row.get(9).ok()?;
    let created_at: String = row.get(10).ok()?;

    Some(Transaction {
        id: Uuid::parse_str(&id).ok()?,
        user_id: Uuid::parse_str(&user_id).ok()?,
        date: parse_date(&tx_date)?,
        description,
        amount: Decimal::from_str(&amount).ok()?,
        kind: TransactionKind::from_str(&kind).ok()?,
        account: AccountRef {
            kind: AccountKind::from_str(&account_kind).ok()?,
            bank_name,
        },
        source: TransactionSource::from_str(&source).ok()?,
        statement_id: statement_id.and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn row_to_checkpoint(row: &Row) -> Option<BalanceCheckpoint> {
    let id: String = row.get(0).ok()?;
    let user_id: String = row.get(1).ok()?;
    let account_kind: String = row.get(2).ok()?;
    let bank_name: String = row.get(3).ok()?;
    let year: i64 = row.get(4).ok()?;
    let month: i64 = row.get(5).ok()?;
    let balance: String = row.get(6).ok()?;
    let last_transaction_id: Option<String> = row.get(7).ok()?;
    let statement_id: Option<String> = row.get(8).ok()?;
    let created_at: String = row.get(9).ok()?;

    Some(BalanceCheckpoint {
        id: Uuid::parse_str(&id).ok()?,
        user_id: Uuid::parse_str(&user_id).ok()?,
        account: AccountRef {
            kind: AccountKind::from_str(&account_kind).ok()?,
            bank_name,
        },
        statement_month: StatementMonth::new(year as i32, month as u32).ok()?,
        balance: Decimal::from_str(&balance).ok()?,
        last_transaction_id: last_transaction_id.and_then(|s| Uuid::parse_str(&s).ok()),
        statement_id: statement_id.and_then(|s| Uuid::parse_str(&s).ok()),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Amounts are stored as normalized decimal strings so equality in SQL
/// matches Decimal equality (450 == 450.00)
fn amount_str(amount: Decimal) -> String {
    amount.normalize().to_string()
}

fn store_err(e: duckdb::Error) -> Error {
    Error::store(e.to_string())
}

#[async_trait]
impl TransactionStore for DuckDbStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<InsertOutcome> {
        let conn = self.conn.lock().unwrap();

        let result = conn.execute(
            "INSERT INTO sys_transactions (transaction_id, user_id, tx_date, description,
                                           amount, kind, account_kind, bank_name, source,
                                           statement_id, dedup_key, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                tx.id.to_string(),
                tx.user_id.to_string(),
                date_str(tx.date),
                tx.description,
                amount_str(tx.amount),
                tx.kind.as_str(),
                tx.account.kind.as_str(),
                tx.account.bank_name,
                tx.source.as_str(),
                tx.statement_id.map(|id| id.to_string()),
                tx.dedup_key(),
                tx.created_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_unique_violation(&e.to_string()) => Ok(InsertOutcome::DuplicateKey),
            Err(e) => Err(store_err(e)),
        }
    }

    async fn get_transaction(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM sys_transactions
                 WHERE user_id = ? AND transaction_id = ?"
            ))
            .map_err(store_err)?;

        let tx = stmt
            .query_map(
                params![user_id.to_string(), id.to_string()],
                |row| Ok(row_to_transaction(row)),
            )
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .flatten()
            .next();
        Ok(tx)
    }

    async fn find_same_source(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn.lock().unwrap();
        // The dedup key hashes (source, date, description, amount, kind,
        // bank); matching on it keeps this lookup aligned with the UNIQUE
        // constraint the insert relies on. user_id is checked explicitly so
        // a key collision can never cross a user boundary.
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM sys_transactions
                 WHERE user_id = ? AND dedup_key = ?
                 LIMIT 1"
            ))
            .map_err(store_err)?;

        let tx = stmt
            .query_map(
                params![user_id.to_string(), candidate.dedup_key(user_id)],
                |row| Ok(row_to_transaction(row)),
            )
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .flatten()
            .next();
        Ok(tx)
    }

    async fn find_cross_source(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<Option<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM sys_transactions
                 WHERE user_id = ? AND source <> ? AND tx_date = ?
                   AND description = ? AND amount = ? AND bank_name = ?
                 LIMIT 1"
            ))
            .map_err(store_err)?;

        let tx = stmt
            .query_map(
                params![
                    user_id.to_string(),
                    candidate.source.as_str(),
                    date_str(candidate.date),
                    candidate.description,
                    amount_str(candidate.amount),
                    candidate.account.bank_name,
                ],
                |row| Ok(row_to_transaction(row)),
            )
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .flatten()
            .next();
        Ok(tx)
    }

    async fn expenses_after(
        &self,
        user_id: Uuid,
        account: &AccountRef,
        after: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        // ISO date strings compare lexically in chronological order
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM sys_transactions
                 WHERE user_id = ? AND account_kind = ? AND bank_name = ?
                   AND kind = ? AND tx_date > ?
                 ORDER BY tx_date"
            ))
            .map_err(store_err)?;

        let expenses = stmt
            .query_map(
                params![
                    user_id.to_string(),
                    account.kind.as_str(),
                    account.bank_name,
                    TransactionKind::Expense.as_str(),
                    date_str(after),
                ],
                |row| Ok(row_to_transaction(row)),
            )
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();
        Ok(expenses)
    }

    async fn count_transactions(&self, user_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM sys_transactions WHERE user_id = ?",
            params![user_id.to_string()],
            |row| row.get(0),
        )
        .map_err(store_err)
    }

    async fn add_checkpoint(&self, checkpoint: &BalanceCheckpoint) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO sys_checkpoints (checkpoint_id, user_id, account_kind, bank_name,
                                          statement_year, statement_month, balance,
                                          last_transaction_id, statement_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                checkpoint.id.to_string(),
                checkpoint.user_id.to_string(),
                checkpoint.account.kind.as_str(),
                checkpoint.account.bank_name,
                checkpoint.statement_month.year() as i64,
                checkpoint.statement_month.month() as i64,
                amount_str(checkpoint.balance),
                checkpoint.last_transaction_id.map(|id| id.to_string()),
                checkpoint.statement_id.map(|id| id.to_string()),
                checkpoint.created_at.to_rfc3339(),
            ],
        )
        .map_err(store_err)?;
        Ok(())
    }

    async fn checkpoints_for_account(
        &self,
        user_id: Uuid,
        account: &AccountRef,
    ) -> Result<Vec<BalanceCheckpoint>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHECKPOINT_COLUMNS} FROM sys_checkpoints
                 WHERE user_id = ? AND account_kind = ? AND bank_name = ?"
            ))
            .map_err(store_err)?;

        let checkpoints = stmt
            .query_map(
                params![
                    user_id.to_string(),
                    account.kind.as_str(),
                    account.bank_name,
                ],
                |row| Ok(row_to_checkpoint(row)),
            )
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();
        Ok(checkpoints)
    }

    async fn checkpointed_accounts(&self, user_id: Uuid) -> Result<Vec<AccountRef>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT DISTINCT account_kind, bank_name FROM sys_checkpoints
                 WHERE user_id = ?
                 ORDER BY account_kind, bank_name",
            )
            .map_err(store_err)?;

        let accounts = stmt
            .query_map(params![user_id.to_string()], |row| {
                let kind: String = row.get(0)?;
                let bank_name: String = row.get(1)?;
                Ok(AccountKind::from_str(&kind)
                    .ok()
                    .map(|kind| AccountRef { kind, bank_name }))
            })
            .map_err(store_err)?
            .filter_map(|r| r.ok())
            .flatten()
            .collect();
        Ok(accounts)
    }

    async fn count_checkpoints(&self, user_id: Uuid) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM sys_checkpoints WHERE user_id = ?",
            params![user_id.to_string()],
            |row| row.get(0),
        )
        .map_err(store_err)
    }
}
