//! Checkpoint service - statement checkpoint lifecycle and selection

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::result::{Error, Result};
use crate::domain::{
    most_recent, parse_month_labels, sort_most_recent_first, AccountRef, BalanceCheckpoint,
    StatementMonth,
};
use crate::ports::TransactionStore;

/// A checkpoint to record, as produced by statement ingestion
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    pub account: AccountRef,
    pub statement_month: StatementMonth,
    /// Closing balance for bank accounts; amount due for credit cards
    pub balance: Decimal,
    pub last_transaction_id: Option<Uuid>,
    pub statement_id: Option<Uuid>,
}

/// Legacy month labels resolved into ordered months plus data-quality
/// warnings for the labels that failed to parse
#[derive(Debug, Clone, Serialize)]
pub struct MonthLabelReport {
    /// Most recent first
    pub months: Vec<StatementMonth>,
    /// Labels excluded from the ordering
    pub unparseable: Vec<String>,
}

/// Checkpoint service for recording and selecting statement checkpoints
pub struct CheckpointService {
    store: Arc<dyn TransactionStore>,
    lookup_timeout: Duration,
}

impl CheckpointService {
    pub fn new(store: Arc<dyn TransactionStore>, config: &Config) -> Self {
        Self {
            store,
            lookup_timeout: config.lookup_timeout(),
        }
    }

    /// Record a new checkpoint for an account.
    ///
    /// The anchor transaction is resolved now, so a dangling reference is
    /// caught at the statement boundary instead of surfacing later as a
    /// failed projection. Checkpoints are never mutated; a newer one for
    /// the same account supersedes by ordering.
    pub async fn record(&self, user_id: Uuid, new: NewCheckpoint) -> Result<BalanceCheckpoint> {
        if let Some(anchor_id) = new.last_transaction_id {
            let anchor = self
                .with_timeout(self.store.get_transaction(user_id, anchor_id))
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("anchor transaction {anchor_id} does not exist"))
                })?;
            if anchor.account != new.account {
                return Err(Error::validation(format!(
                    "anchor transaction belongs to {}, not {}",
                    anchor.account, new.account
                )));
            }
        }

        let mut checkpoint = BalanceCheckpoint::new(
            user_id,
            new.account,
            new.statement_month,
            new.balance,
        );
        checkpoint.last_transaction_id = new.last_transaction_id;
        checkpoint.statement_id = new.statement_id;

        self.with_timeout(self.store.add_checkpoint(&checkpoint))
            .await?;
        Ok(checkpoint)
    }

    /// The checkpoint that currently governs an account's projection
    pub async fn latest(
        &self,
        user_id: Uuid,
        account: &AccountRef,
    ) -> Result<Option<BalanceCheckpoint>> {
        let checkpoints = self
            .with_timeout(self.store.checkpoints_for_account(user_id, account))
            .await?;
        Ok(most_recent(&checkpoints).cloned())
    }

    /// All checkpoints for an account, most recent first
    pub async fn list(
        &self,
        user_id: Uuid,
        account: &AccountRef,
    ) -> Result<Vec<BalanceCheckpoint>> {
        let mut checkpoints = self
            .with_timeout(self.store.checkpoints_for_account(user_id, account))
            .await?;
        sort_most_recent_first(&mut checkpoints);
        Ok(checkpoints)
    }

    /// Resolve legacy month labels at the ingestion boundary.
    ///
    /// `assumed_year` applies to bare labels like "May"; callers choose it
    /// explicitly because a stored bare label re-parsed in a different
    /// calendar year would silently change its resolved year.
    pub fn resolve_month_labels(&self, labels: &[String], assumed_year: i32) -> MonthLabelReport {
        let (months, unparseable) = parse_month_labels(labels, assumed_year);
        MonthLabelReport {
            months,
            unparseable,
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.lookup_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.lookup_timeout.as_millis() as u64)),
        }
    }
}
