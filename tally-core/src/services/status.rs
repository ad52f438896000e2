//! Status service - reconciliation data summaries

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::result::Result;
use crate::domain::{most_recent, AccountRef};
use crate::ports::TransactionStore;

/// Status service for data summaries
pub struct StatusService {
    store: Arc<dyn TransactionStore>,
}

impl StatusService {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// Get an overall summary for one user
    pub async fn summary(&self, user_id: Uuid) -> Result<StatusSummary> {
        let total_transactions = self.store.count_transactions(user_id).await?;
        let total_checkpoints = self.store.count_checkpoints(user_id).await?;
        let account_refs = self.store.checkpointed_accounts(user_id).await?;

        let mut accounts = Vec::with_capacity(account_refs.len());
        for account in account_refs {
            let checkpoints = self
                .store
                .checkpoints_for_account(user_id, &account)
                .await?;
            accounts.push(AccountStatus {
                latest_statement_month: most_recent(&checkpoints)
                    .map(|c| c.statement_month.to_string()),
                checkpoint_count: checkpoints.len(),
                account,
            });
        }

        Ok(StatusSummary {
            total_transactions,
            total_checkpoints,
            accounts,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct StatusSummary {
    pub total_transactions: i64,
    pub total_checkpoints: i64,
    pub accounts: Vec<AccountStatus>,
}

#[derive(Debug, Serialize)]
pub struct AccountStatus {
    pub account: AccountRef,
    pub checkpoint_count: usize,
    pub latest_statement_month: Option<String>,
}
