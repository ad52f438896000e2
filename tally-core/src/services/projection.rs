//! Projection service - live balance roll-forward from checkpoints
//!
//! A projected balance is always derived, never cached: the most recent
//! statement checkpoint supplies an authoritative balance plus the id of
//! the last transaction it reflects, and every expense recorded strictly
//! after that anchor is replayed on top. Recomputing on every read keeps
//! the result consistent with the latest canonical transactions at the
//! cost of work proportional to the expenses since the checkpoint.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::result::{Error, Result};
use crate::domain::{most_recent, AccountKind, AccountRef, StatementMonth};
use crate::ports::TransactionStore;

/// A successfully projected account balance
#[derive(Debug, Clone, Serialize)]
pub struct AccountProjection {
    pub account: AccountRef,
    /// Live balance for bank accounts; live amount due for credit cards
    pub balance: Decimal,
    pub checkpoint_id: Uuid,
    pub statement_month: StatementMonth,
    /// Expenses replayed on top of the checkpoint balance
    pub replayed_expenses: usize,
    pub replayed_total: Decimal,
}

/// Outcome of projecting one account
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProjectionOutcome {
    Projected(AccountProjection),
    /// No checkpoint exists for the account. The balance is unknown, which
    /// callers must not conflate with zero.
    InsufficientData,
}

/// A projection that failed for one account
#[derive(Debug, Clone, Serialize)]
pub struct ProjectionFailure {
    pub account: AccountRef,
    pub error: String,
}

/// Partial-results report across a user's checkpointed accounts
#[derive(Debug, Clone, Serialize)]
pub struct ProjectionReport {
    pub projected: Vec<AccountProjection>,
    /// Accounts whose projection failed; the rest of the report stands
    pub unavailable: Vec<ProjectionFailure>,
    /// Sum of per-account projected balances across bank accounts
    pub bank_total: Decimal,
    /// Sum of per-account projected amounts due across credit cards
    pub credit_card_total: Decimal,
}

/// Projection service for live balance computation
pub struct ProjectionService {
    store: Arc<dyn TransactionStore>,
    lookup_timeout: Duration,
    concurrency: usize,
}

impl ProjectionService {
    pub fn new(store: Arc<dyn TransactionStore>, config: &Config) -> Self {
        Self {
            store,
            lookup_timeout: config.lookup_timeout(),
            concurrency: config.projection_concurrency.max(1),
        }
    }

    /// Project the live balance for one account
    pub async fn project_account(
        &self,
        user_id: Uuid,
        account: &AccountRef,
    ) -> Result<ProjectionOutcome> {
        project_one(
            self.store.clone(),
            self.lookup_timeout,
            user_id,
            account.clone(),
        )
        .await
    }

    /// Project every checkpointed account, optionally filtered by kind.
    ///
    /// Accounts are projected independently with bounded concurrency, and
    /// the combined totals are sums of the per-account projections - one
    /// account's checkpoint date never gates another account's replay
    /// window. Reads are not transactional with a concurrent ingest: the
    /// report is "as of the last completed read".
    pub async fn project_all(
        &self,
        user_id: Uuid,
        kind: Option<AccountKind>,
    ) -> Result<ProjectionReport> {
        let accounts = with_timeout(
            self.lookup_timeout,
            self.store.checkpointed_accounts(user_id),
        )
        .await?;
        let accounts: Vec<AccountRef> = accounts
            .into_iter()
            .filter(|a| kind.map_or(true, |k| a.kind == k))
            .collect();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(accounts.len());
        for account in accounts {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let lookup_timeout = self.lookup_timeout;
            let task_account = account.clone();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return Err(Error::store(e.to_string())),
                };
                project_one(store, lookup_timeout, user_id, task_account).await
            });
            handles.push((account, handle));
        }

        let mut report = ProjectionReport {
            projected: Vec::new(),
            unavailable: Vec::new(),
            bank_total: Decimal::ZERO,
            credit_card_total: Decimal::ZERO,
        };
        for (account, handle) in handles {
            match handle.await {
                Ok(Ok(ProjectionOutcome::Projected(projection))) => {
                    match projection.account.kind {
                        AccountKind::BankAccount => report.bank_total += projection.balance,
                        AccountKind::CreditCard => report.credit_card_total += projection.balance,
                    }
                    report.projected.push(projection);
                }
                // Enumerated from checkpoints, so this only happens when a
                // concurrent writer changed the data mid-report; skip.
                Ok(Ok(ProjectionOutcome::InsufficientData)) => {}
                Ok(Err(e)) => report.unavailable.push(ProjectionFailure {
                    account,
                    error: e.to_string(),
                }),
                Err(e) => report.unavailable.push(ProjectionFailure {
                    account,
                    error: format!("projection task failed: {e}"),
                }),
            }
        }
        Ok(report)
    }
}

/// Project one account. Free function so `project_all` can move it into
/// spawned tasks.
async fn project_one(
    store: Arc<dyn TransactionStore>,
    lookup_timeout: Duration,
    user_id: Uuid,
    account: AccountRef,
) -> Result<ProjectionOutcome> {
    let checkpoints = with_timeout(
        lookup_timeout,
        store.checkpoints_for_account(user_id, &account),
    )
    .await?;
    let Some(checkpoint) = most_recent(&checkpoints) else {
        return Ok(ProjectionOutcome::InsufficientData);
    };

    let Some(anchor_id) = checkpoint.last_transaction_id else {
        // No anchor: the checkpoint balance is already current
        return Ok(ProjectionOutcome::Projected(AccountProjection {
            account,
            balance: checkpoint.balance,
            checkpoint_id: checkpoint.id,
            statement_month: checkpoint.statement_month,
            replayed_expenses: 0,
            replayed_total: Decimal::ZERO,
        }));
    };

    // Resolve the anchor to find where the replay window opens. A dangling
    // anchor must fail loudly: treating the window as unbounded would
    // double-count every historical expense.
    let anchor = with_timeout(lookup_timeout, store.get_transaction(user_id, anchor_id))
        .await?
        .ok_or(Error::DanglingCheckpoint {
            checkpoint: checkpoint.id,
            transaction: anchor_id,
        })?;

    // Strictly after: an expense dated on the anchor's day is assumed
    // already included in the checkpoint balance
    let expenses = with_timeout(
        lookup_timeout,
        store.expenses_after(user_id, &account, anchor.date),
    )
    .await?;

    let replayed_total: Decimal = expenses.iter().map(|t| t.amount).sum();
    let balance = match account.kind {
        AccountKind::BankAccount => checkpoint.balance - replayed_total,
        // Spending increases what is owed
        AccountKind::CreditCard => checkpoint.balance + replayed_total,
    };

    Ok(ProjectionOutcome::Projected(AccountProjection {
        account,
        balance,
        checkpoint_id: checkpoint.id,
        statement_month: checkpoint.statement_month,
        replayed_expenses: expenses.len(),
        replayed_total,
    }))
}

async fn with_timeout<T>(deadline: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(deadline.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::{
        BalanceCheckpoint, CandidateTransaction, TransactionKind, TransactionSource,
    };
    use chrono::NaiveDate;

    fn service_with(store: Arc<InMemoryStore>) -> ProjectionService {
        ProjectionService::new(store, &Config::default())
    }

    fn expense(
        account: &AccountRef,
        day: u32,
        amount: i64,
        description: &str,
    ) -> CandidateTransaction {
        CandidateTransaction {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            description: description.to_string(),
            amount: Decimal::new(amount, 0),
            kind: TransactionKind::Expense,
            account: account.clone(),
            source: TransactionSource::Email,
            statement_id: None,
        }
    }

    async fn seed(
        store: &InMemoryStore,
        user: Uuid,
        candidate: CandidateTransaction,
    ) -> crate::domain::Transaction {
        let tx = candidate.into_transaction(user);
        store.insert_transaction(&tx).await.unwrap();
        tx
    }

    fn checkpoint_for(
        user: Uuid,
        account: &AccountRef,
        balance: i64,
        anchor: Option<Uuid>,
    ) -> BalanceCheckpoint {
        let month = StatementMonth::new(2024, 3).unwrap();
        let mut checkpoint =
            BalanceCheckpoint::new(user, account.clone(), month, Decimal::new(balance, 0));
        checkpoint.last_transaction_id = anchor;
        checkpoint
    }

    #[tokio::test]
    async fn test_bank_account_roll_forward() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

        // Anchor dated 2024-03-01, closing balance 10000
        let anchor = seed(&store, user, expense(&account, 1, 250, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &account, 10_000, Some(anchor.id)))
            .await
            .unwrap();

        // Two expenses after the anchor
        seed(&store, user, expense(&account, 2, 500, "groceries")).await;
        seed(&store, user, expense(&account, 3, 1_500, "rent")).await;

        let outcome = service.project_account(user, &account).await.unwrap();
        let ProjectionOutcome::Projected(projection) = outcome else {
            panic!("expected a projected balance");
        };
        assert_eq!(projection.balance, Decimal::new(8_000, 0));
        assert_eq!(projection.replayed_expenses, 2);
        assert_eq!(projection.replayed_total, Decimal::new(2_000, 0));
    }

    #[tokio::test]
    async fn test_credit_card_roll_forward_adds_spend() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let account = AccountRef::new(AccountKind::CreditCard, "ICICI");

        let anchor = seed(&store, user, expense(&account, 1, 100, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &account, 2_000, Some(anchor.id)))
            .await
            .unwrap();
        seed(&store, user, expense(&account, 5, 300, "fuel")).await;

        let outcome = service.project_account(user, &account).await.unwrap();
        let ProjectionOutcome::Projected(projection) = outcome else {
            panic!("expected a projected balance");
        };
        assert_eq!(projection.balance, Decimal::new(2_300, 0));
    }

    #[tokio::test]
    async fn test_replay_window_is_strictly_after_anchor_date() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

        let anchor = seed(&store, user, expense(&account, 10, 100, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &account, 5_000, Some(anchor.id)))
            .await
            .unwrap();

        // Same day as the anchor: already in the checkpoint balance
        seed(&store, user, expense(&account, 10, 999, "same day")).await;
        // Income after the anchor: not replayed
        let mut income = expense(&account, 11, 800, "salary");
        income.kind = TransactionKind::Income;
        seed(&store, user, income).await;

        let outcome = service.project_account(user, &account).await.unwrap();
        let ProjectionOutcome::Projected(projection) = outcome else {
            panic!("expected a projected balance");
        };
        assert_eq!(projection.balance, Decimal::new(5_000, 0));
        assert_eq!(projection.replayed_expenses, 0);
    }

    #[tokio::test]
    async fn test_no_checkpoint_is_insufficient_data_not_zero() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

        let outcome = service.project_account(user, &account).await.unwrap();
        assert!(matches!(outcome, ProjectionOutcome::InsufficientData));
    }

    #[tokio::test]
    async fn test_checkpoint_without_anchor_is_already_current() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

        store
            .add_checkpoint(&checkpoint_for(user, &account, 7_500, None))
            .await
            .unwrap();
        // Expenses exist but nothing is replayed without an anchor
        seed(&store, user, expense(&account, 2, 500, "groceries")).await;

        let outcome = service.project_account(user, &account).await.unwrap();
        let ProjectionOutcome::Projected(projection) = outcome else {
            panic!("expected a projected balance");
        };
        assert_eq!(projection.balance, Decimal::new(7_500, 0));
        assert_eq!(projection.replayed_expenses, 0);
    }

    #[tokio::test]
    async fn test_dangling_anchor_fails_distinctly() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

        let anchor = seed(&store, user, expense(&account, 1, 100, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &account, 5_000, Some(anchor.id)))
            .await
            .unwrap();
        store.delete_transaction(anchor.id);

        let result = service.project_account(user, &account).await;
        assert!(matches!(
            result,
            Err(Error::DanglingCheckpoint { transaction, .. }) if transaction == anchor.id
        ));
    }

    #[tokio::test]
    async fn test_combined_total_gates_each_account_independently() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let hdfc = AccountRef::new(AccountKind::BankAccount, "HDFC");
        let sbi = AccountRef::new(AccountKind::BankAccount, "SBI");

        // HDFC checkpoint anchored on day 1; its day-5 expense replays
        let hdfc_anchor = seed(&store, user, expense(&hdfc, 1, 100, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &hdfc, 10_000, Some(hdfc_anchor.id)))
            .await
            .unwrap();
        seed(&store, user, expense(&hdfc, 5, 1_000, "hdfc spend")).await;

        // SBI checkpoint anchored on day 10; its day-5 expense is already
        // inside the checkpoint balance and must NOT replay, even though
        // it is after HDFC's anchor date
        let sbi_anchor = seed(&store, user, expense(&sbi, 10, 100, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &sbi, 4_000, Some(sbi_anchor.id)))
            .await
            .unwrap();
        seed(&store, user, expense(&sbi, 5, 9_999, "sbi spend")).await;

        let report = service
            .project_all(user, Some(AccountKind::BankAccount))
            .await
            .unwrap();
        assert_eq!(report.projected.len(), 2);
        assert!(report.unavailable.is_empty());
        // 9000 (HDFC) + 4000 (SBI); a pooled replay would have subtracted
        // SBI's 9999 as well
        assert_eq!(report.bank_total, Decimal::new(13_000, 0));
    }

    #[tokio::test]
    async fn test_one_bad_account_yields_partial_results() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let good = AccountRef::new(AccountKind::BankAccount, "HDFC");
        let bad = AccountRef::new(AccountKind::BankAccount, "SBI");

        store
            .add_checkpoint(&checkpoint_for(user, &good, 1_000, None))
            .await
            .unwrap();

        let anchor = seed(&store, user, expense(&bad, 1, 100, "anchor")).await;
        store
            .add_checkpoint(&checkpoint_for(user, &bad, 2_000, Some(anchor.id)))
            .await
            .unwrap();
        store.delete_transaction(anchor.id);

        let report = service.project_all(user, None).await.unwrap();
        assert_eq!(report.projected.len(), 1);
        assert_eq!(report.unavailable.len(), 1);
        assert_eq!(report.unavailable[0].account, bad);
        assert_eq!(report.bank_total, Decimal::new(1_000, 0));
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();
        let bank = AccountRef::new(AccountKind::BankAccount, "HDFC");
        let card = AccountRef::new(AccountKind::CreditCard, "ICICI");

        store
            .add_checkpoint(&checkpoint_for(user, &bank, 1_000, None))
            .await
            .unwrap();
        store
            .add_checkpoint(&checkpoint_for(user, &card, 500, None))
            .await
            .unwrap();

        let report = service
            .project_all(user, Some(AccountKind::CreditCard))
            .await
            .unwrap();
        assert_eq!(report.projected.len(), 1);
        assert_eq!(report.credit_card_total, Decimal::new(500, 0));
        assert_eq!(report.bank_total, Decimal::ZERO);
    }
}
