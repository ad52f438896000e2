//! Core domain entities
//!
//! All business entities are defined here. These are pure data structures
//! with validation and matching logic - no I/O or external dependencies.

mod checkpoint;
mod transaction;
pub mod result;

pub use checkpoint::{
    most_recent, parse_month_labels, sort_most_recent_first, BalanceCheckpoint, StatementMonth,
};
pub use transaction::{
    AccountKind, AccountRef, CandidateTransaction, Transaction, TransactionKind, TransactionSource,
};
