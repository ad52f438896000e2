//! In-memory store - trait-level fake for tests
//!
//! Mirrors the DuckDB adapter's semantics, including the uniqueness
//! constraint on the same-source dedup key. Failure injection makes the
//! lookup-failure and timeout paths of the reconciliation services
//! testable without a database.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::result::{Error, Result};
use crate::domain::{AccountRef, BalanceCheckpoint, CandidateTransaction, Transaction};
use crate::domain::TransactionKind;
use crate::ports::{InsertOutcome, TransactionStore};

#[derive(Default)]
struct State {
    transactions: Vec<Transaction>,
    checkpoints: Vec<BalanceCheckpoint>,
}

/// In-memory transaction store
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    /// Remaining operations forced to fail with a store error
    fail_next: AtomicU32,
    /// Artificial latency applied to every operation
    delay: Mutex<Option<Duration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the next `n` store operations to fail with a store error
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Apply artificial latency to every operation (for timeout tests)
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Remove a transaction by id, ignoring user scope. Exists to simulate
    /// referential inconsistency (a checkpoint anchored on a deleted row).
    pub fn delete_transaction(&self, id: Uuid) {
        self.state
            .lock()
            .unwrap()
            .transactions
            .retain(|t| t.id != id);
    }

    async fn gate(&self) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        // fetch_update: decrement only while positive
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::store("injected store failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn insert_transaction(&self, tx: &Transaction) -> Result<InsertOutcome> {
        self.gate().await?;
        let mut state = self.state.lock().unwrap();

        let key = tx.dedup_key();
        if state.transactions.iter().any(|t| t.dedup_key() == key) {
            return Ok(InsertOutcome::DuplicateKey);
        }
        state.transactions.push(tx.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_transaction(&self, user_id: Uuid, id: Uuid) -> Result<Option<Transaction>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .find(|t| t.user_id == user_id && t.id == id)
            .cloned())
    }

    async fn find_same_source(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<Option<Transaction>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .find(|t| t.user_id == user_id && candidate.matches_same_source(t))
            .cloned())
    }

    async fn find_cross_source(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<Option<Transaction>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .find(|t| t.user_id == user_id && candidate.matches_cross_source(t))
            .cloned())
    }

    async fn expenses_after(
        &self,
        user_id: Uuid,
        account: &AccountRef,
        after: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        let mut expenses: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| {
                t.user_id == user_id
                    && t.account == *account
                    && t.kind == TransactionKind::Expense
                    && t.date > after
            })
            .cloned()
            .collect();
        expenses.sort_by_key(|t| t.date);
        Ok(expenses)
    }

    async fn count_transactions(&self, user_id: Uuid) -> Result<i64> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .count() as i64)
    }

    async fn add_checkpoint(&self, checkpoint: &BalanceCheckpoint) -> Result<()> {
        self.gate().await?;
        self.state.lock().unwrap().checkpoints.push(checkpoint.clone());
        Ok(())
    }

    async fn checkpoints_for_account(
        &self,
        user_id: Uuid,
        account: &AccountRef,
    ) -> Result<Vec<BalanceCheckpoint>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .checkpoints
            .iter()
            .filter(|c| c.user_id == user_id && c.account == *account)
            .cloned()
            .collect())
    }

    async fn checkpointed_accounts(&self, user_id: Uuid) -> Result<Vec<AccountRef>> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        let mut accounts: Vec<AccountRef> = Vec::new();
        for checkpoint in state.checkpoints.iter().filter(|c| c.user_id == user_id) {
            if !accounts.contains(&checkpoint.account) {
                accounts.push(checkpoint.account.clone());
            }
        }
        Ok(accounts)
    }

    async fn count_checkpoints(&self, user_id: Uuid) -> Result<i64> {
        self.gate().await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .checkpoints
            .iter()
            .filter(|c| c.user_id == user_id)
            .count() as i64)
    }
}
