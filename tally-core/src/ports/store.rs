//! Transaction store port - persistence abstraction

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{AccountRef, BalanceCheckpoint, CandidateTransaction, Transaction};

/// Outcome of inserting a canonical transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The store's uniqueness constraint on the same-source duplicate key
    /// rejected the row. Two sync jobs racing past the dedup pre-check land
    /// here; callers treat it as "duplicate, skip", not as a failure.
    DuplicateKey,
}

/// Canonical transaction store abstraction
///
/// This trait defines all persistence operations the reconciliation core
/// needs. Every lookup is scoped to a single user; an implementation that
/// matches rows across user boundaries is incorrect, not merely slow.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    // === Transactions ===

    /// Insert a canonical transaction, enforcing the same-source duplicate
    /// key constraint
    async fn insert_transaction(&self, tx: &Transaction) -> Result<InsertOutcome>;

    /// Look up a transaction by id
    async fn get_transaction(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>>;

    /// First existing transaction matching the candidate's same-source
    /// duplicate key
    async fn find_same_source(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<Option<Transaction>>;

    /// First existing transaction from a *different* source matching the
    /// candidate's description, amount, and bank on the same calendar day
    async fn find_cross_source(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<Option<Transaction>>;

    /// Expense transactions for one account strictly after `after`,
    /// ordered by date
    async fn expenses_after(
        &self,
        user_id: Uuid,
        account: &AccountRef,
        after: NaiveDate,
    ) -> Result<Vec<Transaction>>;

    /// Total canonical transactions for a user
    async fn count_transactions(&self, user_id: Uuid) -> Result<i64>;

    // === Checkpoints ===

    /// Persist a balance checkpoint
    async fn add_checkpoint(&self, checkpoint: &BalanceCheckpoint) -> Result<()>;

    /// All checkpoints recorded for one account
    async fn checkpoints_for_account(
        &self,
        user_id: Uuid,
        account: &AccountRef,
    ) -> Result<Vec<BalanceCheckpoint>>;

    /// Accounts that have at least one checkpoint
    async fn checkpointed_accounts(&self, user_id: Uuid) -> Result<Vec<AccountRef>>;

    /// Total checkpoints for a user
    async fn count_checkpoints(&self, user_id: Uuid) -> Result<i64>;
}
