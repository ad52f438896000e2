//! Result and error types for the core library

use thiserror::Error;
use uuid::Uuid;

/// Core library error type
///
/// Note: "no checkpoint exists for this account" is deliberately NOT an
/// error. A missing checkpoint means the balance is unknown, which callers
/// must be able to tell apart from zero; projection reports it as an
/// explicit outcome variant instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The canonical store was unreachable or a query failed. Retryable.
    #[error("Store error: {0}")]
    Store(String),

    /// A store lookup exceeded the configured deadline. Retryable.
    #[error("Store lookup timed out after {0}ms")]
    Timeout(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// A checkpoint's anchor transaction no longer resolves. Fatal for that
    /// account's projection; never masked as a zero or stale balance.
    #[error("Checkpoint {checkpoint} references missing transaction {transaction}")]
    DanglingCheckpoint { checkpoint: Uuid, transaction: Uuid },

    /// A statement-month label could not be parsed into (month, year).
    #[error("Unparseable statement month label: {0:?}")]
    UnparseableMonth(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether retrying the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Timeout(_))
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
