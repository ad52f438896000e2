//! Balance checkpoint domain model

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::result::{Error, Result};
use super::transaction::AccountRef;

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Calendar month a statement covers
///
/// The year is always explicit in the persisted form. Bare month labels
/// ("May") are accepted only through [`StatementMonth::parse_legacy`], which
/// forces the caller to choose the assumed year: re-parsing a stored bare
/// label in a different calendar year would silently change its meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawStatementMonth", into = "RawStatementMonth")]
pub struct StatementMonth {
    year: i32,
    /// 1-12
    month: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStatementMonth {
    year: i32,
    month: u32,
}

impl TryFrom<RawStatementMonth> for StatementMonth {
    type Error = String;

    fn try_from(raw: RawStatementMonth) -> std::result::Result<Self, Self::Error> {
        StatementMonth::new(raw.year, raw.month).map_err(|e| e.to_string())
    }
}

impl From<StatementMonth> for RawStatementMonth {
    fn from(m: StatementMonth) -> Self {
        Self {
            year: m.year,
            month: m.month,
        }
    }
}

impl StatementMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::validation(format!(
                "statement month must be 1-12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Parse a full label like "May 2023" (case-insensitive; three-letter
    /// abbreviations accepted). Bare month labels are rejected here.
    pub fn parse(label: &str) -> Result<Self> {
        let mut parts = label.split_whitespace();
        let (Some(name), Some(year_part), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::UnparseableMonth(label.to_string()));
        };

        let month = month_from_name(name).ok_or_else(|| Error::UnparseableMonth(label.to_string()))?;
        let year: i32 = year_part
            .parse()
            .map_err(|_| Error::UnparseableMonth(label.to_string()))?;

        Self::new(year, month)
    }

    /// Legacy-input shim: also accepts a bare month name ("May"), resolved
    /// against `assumed_year`. One-way compatibility for old labels; never
    /// use the bare form as the stored representation.
    pub fn parse_legacy(label: &str, assumed_year: i32) -> Result<Self> {
        let mut parts = label.split_whitespace();
        if let (Some(name), None) = (parts.next(), parts.next()) {
            if let Some(month) = month_from_name(name) {
                return Self::new(assumed_year, month);
            }
        }
        Self::parse(label)
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let lower = name.trim().to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|full| *full == lower || (lower.len() == 3 && full.starts_with(&lower)))
        .map(|i| i as u32 + 1)
}

impl fmt::Display for StatementMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NaiveDate::from_ymd_opt(self.year, self.month, 1) {
            Some(d) => write!(f, "{}", d.format("%B %Y")),
            None => write!(f, "{}-{:02}", self.year, self.month),
        }
    }
}

/// The authoritative balance for one account as of a statement's close
///
/// Created once per statement upload per account; never mutated. A newer
/// statement supersedes it by ordering, it is not deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceCheckpoint {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account: AccountRef,
    pub statement_month: StatementMonth,
    /// Closing balance for bank accounts; amount due for credit cards
    pub balance: Decimal,
    /// The most recent canonical transaction already reflected in
    /// `balance`. None means the checkpoint balance is already current.
    pub last_transaction_id: Option<Uuid>,
    /// Statement batch this checkpoint came from
    pub statement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl BalanceCheckpoint {
    pub fn new(
        user_id: Uuid,
        account: AccountRef,
        statement_month: StatementMonth,
        balance: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            account,
            statement_month,
            balance,
            last_transaction_id: None,
            statement_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Most recent checkpoint: statement month descending, ties broken by
/// creation time so a re-uploaded statement for the same month supersedes
/// deterministically.
pub fn most_recent(checkpoints: &[BalanceCheckpoint]) -> Option<&BalanceCheckpoint> {
    checkpoints
        .iter()
        .max_by_key(|c| (c.statement_month, c.created_at))
}

/// Sort checkpoints most recent first (see [`most_recent`] for the order)
pub fn sort_most_recent_first(checkpoints: &mut [BalanceCheckpoint]) {
    checkpoints.sort_by(|a, b| {
        (b.statement_month, b.created_at).cmp(&(a.statement_month, a.created_at))
    });
}

/// Parse a batch of legacy month labels.
///
/// Returns the parsed months ordered most recent first, plus the labels
/// that failed to parse. Unparseable labels are excluded from the ordering
/// rather than compared as equal, which would make the sort order depend on
/// the sort algorithm.
pub fn parse_month_labels(labels: &[String], assumed_year: i32) -> (Vec<StatementMonth>, Vec<String>) {
    let mut months = Vec::new();
    let mut unparseable = Vec::new();

    for label in labels {
        match StatementMonth::parse_legacy(label, assumed_year) {
            Ok(month) => months.push(month),
            Err(_) => unparseable.push(label.clone()),
        }
    }

    months.sort_by(|a, b| b.cmp(a));
    (months, unparseable)
}
