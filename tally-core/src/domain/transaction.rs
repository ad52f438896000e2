//! Transaction domain model

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Direction of a transaction; the amount itself is always a positive magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Expense,
    Income,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Expense => "expense",
            TransactionKind::Income => "income",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expense" | "debit" => Ok(TransactionKind::Expense),
            "income" | "credit" => Ok(TransactionKind::Income),
            other => Err(format!("unknown transaction kind: {other:?}")),
        }
    }
}

/// Account classification; partitions balance projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    BankAccount,
    CreditCard,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::BankAccount => "bank_account",
            AccountKind::CreditCard => "credit_card",
        }
    }
}

impl FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bank_account" | "bank" => Ok(AccountKind::BankAccount),
            "credit_card" | "card" => Ok(AccountKind::CreditCard),
            other => Err(format!("unknown account kind: {other:?}")),
        }
    }
}

/// Which pipeline reported a transaction
///
/// Provenance is used only by the dedup matching rules; display logic must
/// never assume any source is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Statement,
    Email,
    Manual,
}

impl TransactionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionSource::Statement => "statement",
            TransactionSource::Email => "email",
            TransactionSource::Manual => "manual",
        }
    }
}

impl FromStr for TransactionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "statement" => Ok(TransactionSource::Statement),
            "email" => Ok(TransactionSource::Email),
            "manual" => Ok(TransactionSource::Manual),
            other => Err(format!("unknown transaction source: {other:?}")),
        }
    }
}

/// Identifies one account within a user's data
///
/// Kept as a typed pair rather than a joined string so a bank name
/// containing a separator character can never collide with another key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub kind: AccountKind,
    pub bank_name: String,
}

impl AccountRef {
    pub fn new(kind: AccountKind, bank_name: impl Into<String>) -> Self {
        Self {
            kind,
            bank_name: bank_name.into(),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.bank_name, self.kind.as_str())
    }
}

/// A single canonical transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Calendar date; time-of-day is not significant for reconciliation
    pub date: NaiveDate,
    pub description: String,
    /// Positive magnitude; direction is carried by `kind`
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub account: AccountRef,
    pub source: TransactionSource,
    /// Statement batch that produced this row; None for email/manual sources
    pub statement_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Same-source duplicate key for this row, matching
    /// [`CandidateTransaction::dedup_key`].
    pub fn dedup_key(&self) -> String {
        same_source_key(
            self.user_id,
            self.source,
            self.date,
            &self.description,
            self.amount,
            self.kind,
            &self.account.bank_name,
        )
    }
}

/// A transaction reported by a source but not yet admitted to the canonical
/// store
///
/// Candidates carry no id: identity is assigned at insert, after the
/// deduplication decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateTransaction {
    pub date: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub account: AccountRef,
    pub source: TransactionSource,
    pub statement_id: Option<Uuid>,
}

impl CandidateTransaction {
    /// Validate candidate shape before admission
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.amount <= Decimal::ZERO {
            return Err("amount must be a positive magnitude");
        }
        if self.account.bank_name.trim().is_empty() {
            return Err("bank name cannot be empty");
        }
        if self.source != TransactionSource::Statement && self.statement_id.is_some() {
            return Err("only statement-sourced transactions carry a statement id");
        }
        Ok(())
    }

    /// Normalize a raw description at the candidate boundary.
    ///
    /// Trims and collapses whitespace runs only. The dedup engine compares
    /// descriptions exactly; a false-positive match is worse than a missed
    /// duplicate, which the user can still correct.
    pub fn normalize_description(desc: &str) -> String {
        let whitespace_re = Regex::new(r"\s+").unwrap();
        whitespace_re.replace_all(desc.trim(), " ").to_string()
    }

    /// Same-source duplicate key: one statement file processed twice
    /// produces identical keys, which the store rejects at insert.
    pub fn dedup_key(&self, user_id: Uuid) -> String {
        same_source_key(
            user_id,
            self.source,
            self.date,
            &self.description,
            self.amount,
            self.kind,
            &self.account.bank_name,
        )
    }

    /// Same-source exact match: identical source, date, description, amount,
    /// kind, and bank name.
    pub fn matches_same_source(&self, existing: &Transaction) -> bool {
        existing.source == self.source
            && existing.date == self.date
            && existing.description == self.description
            && existing.amount == self.amount
            && existing.kind == self.kind
            && existing.account.bank_name == self.account.bank_name
    }

    /// Cross-source match: a *different* source reporting the same
    /// real-world event. Looser than the same-source key: sources disagree
    /// on time-of-day precision, so the date check is calendar-day equality
    /// (dates here are already day-granular).
    pub fn matches_cross_source(&self, existing: &Transaction) -> bool {
        existing.source != self.source
            && existing.date == self.date
            && existing.description == self.description
            && existing.amount == self.amount
            && existing.account.bank_name == self.account.bank_name
    }

    /// Promote an accepted candidate to a canonical transaction
    pub fn into_transaction(self, user_id: Uuid) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            user_id,
            date: self.date,
            description: self.description,
            amount: self.amount,
            kind: self.kind,
            account: self.account,
            source: self.source,
            statement_id: self.statement_id,
            created_at: Utc::now(),
        }
    }
}

/// Hash of the same-source duplicate key, used as the store-level UNIQUE
/// column. Amount is normalized first so `450` and `450.00` produce the
/// same key.
fn same_source_key(
    user_id: Uuid,
    source: TransactionSource,
    date: NaiveDate,
    description: &str,
    amount: Decimal,
    kind: TransactionKind,
    bank_name: &str,
) -> String {
    let key_str = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        user_id,
        source.as_str(),
        date.format("%Y-%m-%d"),
        description,
        amount.normalize(),
        kind.as_str(),
        bank_name
    );

    // SHA256 hash, truncated to 16 hex chars
    let mut hasher = Sha256::new();
    hasher.update(key_str.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

// Need hex encoding for the dedup key
mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
