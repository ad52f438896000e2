//! Integration tests for the DuckDB store adapter
//!
//! These tests verify the adapter against a real DuckDB file: schema
//! migrations, the dedup-key uniqueness constraint, user scoping, and the
//! strictly-after expense window used by projection.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tempfile::TempDir;
use uuid::Uuid;

use tally_core::adapters::duckdb::DuckDbStore;
use tally_core::config::Config;
use tally_core::domain::{
    AccountKind, AccountRef, BalanceCheckpoint, CandidateTransaction, StatementMonth,
    TransactionKind, TransactionSource,
};
use tally_core::ports::{InsertOutcome, TransactionStore};
use tally_core::services::{ProjectionOutcome, ProjectionService};

/// Create a store with schema initialized
fn create_test_store(temp_dir: &TempDir) -> Arc<DuckDbStore> {
    let db_path = temp_dir.path().join("test.duckdb");
    let store = DuckDbStore::new(&db_path).expect("Failed to create store");
    store.ensure_schema().expect("Failed to initialize schema");
    Arc::new(store)
}

fn candidate(
    source: TransactionSource,
    day: u32,
    amount: Decimal,
    description: &str,
) -> CandidateTransaction {
    CandidateTransaction {
        date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
        description: description.to_string(),
        amount,
        kind: TransactionKind::Expense,
        account: AccountRef::new(AccountKind::BankAccount, "HDFC"),
        source,
        statement_id: None,
    }
}

#[tokio::test]
async fn test_insert_and_read_back() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let user = Uuid::new_v4();

    let tx = candidate(
        TransactionSource::Statement,
        5,
        Decimal::new(123_456, 2), // 1234.56
        "UPI Swiggy Bangalore",
    )
    .into_transaction(user);

    assert_eq!(
        store.insert_transaction(&tx).await.unwrap(),
        InsertOutcome::Inserted
    );

    let loaded = store.get_transaction(user, tx.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, tx.id);
    assert_eq!(loaded.description, "UPI Swiggy Bangalore");
    assert_eq!(loaded.amount, Decimal::new(123_456, 2));
    assert_eq!(loaded.date, tx.date);
    assert_eq!(loaded.kind, TransactionKind::Expense);
    assert_eq!(loaded.source, TransactionSource::Statement);
    assert_eq!(loaded.account, AccountRef::new(AccountKind::BankAccount, "HDFC"));
}

#[tokio::test]
async fn test_unique_constraint_closes_check_then_insert_race() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let user = Uuid::new_v4();

    // Two rows built from the same candidate: what two racing sync jobs
    // would try to commit after both pre-checks found nothing
    let first = candidate(TransactionSource::Statement, 5, Decimal::new(450, 0), "Swiggy")
        .into_transaction(user);
    let second = candidate(
        TransactionSource::Statement,
        5,
        Decimal::new(45_000, 2), // 450.00 - same key after normalization
        "Swiggy",
    )
    .into_transaction(user);

    assert_eq!(
        store.insert_transaction(&first).await.unwrap(),
        InsertOutcome::Inserted
    );
    assert_eq!(
        store.insert_transaction(&second).await.unwrap(),
        InsertOutcome::DuplicateKey
    );
    assert_eq!(store.count_transactions(user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_lookups_are_user_scoped() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let owner = Uuid::new_v4();
    let other = Uuid::new_v4();

    let swiggy = candidate(TransactionSource::Email, 5, Decimal::new(450, 0), "Swiggy");
    store
        .insert_transaction(&swiggy.clone().into_transaction(owner))
        .await
        .unwrap();

    // Same-source and cross-source both hit for the owner
    let same_source = candidate(TransactionSource::Email, 5, Decimal::new(450, 0), "Swiggy");
    assert!(store
        .find_same_source(owner, &same_source)
        .await
        .unwrap()
        .is_some());
    let cross_source = candidate(TransactionSource::Statement, 5, Decimal::new(450, 0), "Swiggy");
    assert!(store
        .find_cross_source(owner, &cross_source)
        .await
        .unwrap()
        .is_some());

    // Another user must never dedupe against the owner's rows
    assert!(store
        .find_same_source(other, &same_source)
        .await
        .unwrap()
        .is_none());
    assert!(store
        .find_cross_source(other, &cross_source)
        .await
        .unwrap()
        .is_none());

    // The other user can insert the identical transaction
    assert_eq!(
        store
            .insert_transaction(&same_source.into_transaction(other))
            .await
            .unwrap(),
        InsertOutcome::Inserted
    );
}

#[tokio::test]
async fn test_expenses_after_is_strict_and_filtered() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let user = Uuid::new_v4();
    let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

    for (day, amount, description) in [(1, 100, "on the boundary"), (2, 500, "groceries"), (3, 1_500, "rent")] {
        let tx = candidate(
            TransactionSource::Email,
            day,
            Decimal::new(amount, 0),
            description,
        )
        .into_transaction(user);
        store.insert_transaction(&tx).await.unwrap();
    }

    // Income and other accounts stay out of the window
    let mut salary = candidate(TransactionSource::Email, 2, Decimal::new(9_000, 0), "salary");
    salary.kind = TransactionKind::Income;
    store
        .insert_transaction(&salary.into_transaction(user))
        .await
        .unwrap();
    let mut other_bank = candidate(TransactionSource::Email, 2, Decimal::new(777, 0), "other bank");
    other_bank.account = AccountRef::new(AccountKind::BankAccount, "SBI");
    store
        .insert_transaction(&other_bank.into_transaction(user))
        .await
        .unwrap();

    let after = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let expenses = store.expenses_after(user, &account, after).await.unwrap();

    let descriptions: Vec<&str> = expenses.iter().map(|t| t.description.as_str()).collect();
    assert_eq!(descriptions, vec!["groceries", "rent"]);
}

#[tokio::test]
async fn test_checkpoint_roundtrip_and_account_listing() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let user = Uuid::new_v4();
    let account = AccountRef::new(AccountKind::CreditCard, "ICICI");

    let mut checkpoint = BalanceCheckpoint::new(
        user,
        account.clone(),
        StatementMonth::parse("May 2023").unwrap(),
        Decimal::new(203_050, 2), // 2030.50
    );
    checkpoint.statement_id = Some(Uuid::new_v4());
    store.add_checkpoint(&checkpoint).await.unwrap();

    let loaded = store.checkpoints_for_account(user, &account).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, checkpoint.id);
    assert_eq!(loaded[0].balance, Decimal::new(203_050, 2));
    assert_eq!(loaded[0].statement_month.to_string(), "May 2023");
    assert_eq!(loaded[0].statement_id, checkpoint.statement_id);
    assert!(loaded[0].last_transaction_id.is_none());

    let accounts = store.checkpointed_accounts(user).await.unwrap();
    assert_eq!(accounts, vec![account]);
    assert_eq!(store.count_checkpoints(user).await.unwrap(), 1);
}

#[tokio::test]
async fn test_projection_over_duckdb() {
    let temp_dir = TempDir::new().unwrap();
    let store = create_test_store(&temp_dir);
    let user = Uuid::new_v4();
    let account = AccountRef::new(AccountKind::BankAccount, "HDFC");

    let anchor = candidate(TransactionSource::Statement, 1, Decimal::new(250, 0), "anchor")
        .into_transaction(user);
    store.insert_transaction(&anchor).await.unwrap();

    let mut checkpoint = BalanceCheckpoint::new(
        user,
        account.clone(),
        StatementMonth::parse("Mar 2024").unwrap(),
        Decimal::new(10_000, 0),
    );
    checkpoint.last_transaction_id = Some(anchor.id);
    store.add_checkpoint(&checkpoint).await.unwrap();

    for (day, amount) in [(2, 500), (3, 1_500)] {
        let tx = candidate(TransactionSource::Email, day, Decimal::new(amount, 0), "spend")
            .into_transaction(user);
        store.insert_transaction(&tx).await.unwrap();
    }

    let projection = ProjectionService::new(store, &Config::default());
    let outcome = projection.project_account(user, &account).await.unwrap();
    let ProjectionOutcome::Projected(projected) = outcome else {
        panic!("expected a projected balance");
    };
    assert_eq!(projected.balance, Decimal::new(8_000, 0));
    assert_eq!(projected.replayed_expenses, 2);
}
