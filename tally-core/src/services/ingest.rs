//! Ingest service - deduplication and batch admission of candidates
//!
//! Candidates extracted from a statement, a parsed email, or manual entry
//! pass through two ordered duplicate checks before insertion. The checks
//! are pure reads; the insert itself is guarded by the store's uniqueness
//! constraint, so two sync jobs racing for the same user cannot double-insert
//! even when both pre-checks came back clean.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::result::{Error, Result};
use crate::domain::{CandidateTransaction, TransactionSource};
use crate::ports::{InsertOutcome, TransactionStore};

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Decision for a single candidate. First matching rule wins.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DedupDecision {
    Unique,
    /// Exact match from the same source - the same statement file
    /// processed twice
    DuplicateSameSource { existing_id: Uuid },
    /// A different source already reported the same real-world event
    DuplicateCrossSource {
        existing_id: Uuid,
        existing_source: TransactionSource,
    },
}

/// Outcome for one candidate within a batch
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CandidateOutcome {
    Accepted { transaction_id: Uuid },
    /// `existing_id` is None when the duplicate was detected by the store
    /// constraint (a concurrent writer won the race) and the follow-up
    /// lookup could not resolve the winner
    DuplicateSameSource { existing_id: Option<Uuid> },
    DuplicateCrossSource {
        existing_id: Uuid,
        existing_source: TransactionSource,
    },
    /// Store lookups kept failing after bounded retries. The candidate was
    /// neither inserted nor dropped; re-running the batch will retry it.
    FailedPendingRetry { error: String },
    /// The candidate failed shape validation and was never looked up
    Rejected { reason: String },
}

/// Report for one ingested batch
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub batch_id: String,
    pub source: TransactionSource,
    /// Candidates submitted, before any decision
    pub discovered: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Per-candidate outcomes, in submission order
    pub outcomes: Vec<CandidateOutcome>,
}

/// Ingest service for candidate deduplication and admission
pub struct IngestService {
    store: Arc<dyn TransactionStore>,
    lookup_timeout: Duration,
    max_lookup_retries: u32,
}

impl IngestService {
    pub fn new(store: Arc<dyn TransactionStore>, config: &Config) -> Self {
        Self {
            store,
            lookup_timeout: config.lookup_timeout(),
            max_lookup_retries: config.max_lookup_retries,
        }
    }

    /// Decide whether a candidate already exists in the canonical store.
    ///
    /// Ordered checks, first hit wins: same-source exact match, then the
    /// looser cross-source calendar-day match. Pure decision - no writes;
    /// the caller owns the insert. A lookup failure aborts the decision for
    /// this candidate; it is never treated as "no duplicate found".
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<DedupDecision> {
        if let Some(existing) = self
            .with_timeout(self.store.find_same_source(user_id, candidate))
            .await?
        {
            return Ok(DedupDecision::DuplicateSameSource {
                existing_id: existing.id,
            });
        }

        if let Some(existing) = self
            .with_timeout(self.store.find_cross_source(user_id, candidate))
            .await?
        {
            return Ok(DedupDecision::DuplicateCrossSource {
                existing_id: existing.id,
                existing_source: existing.source,
            });
        }

        Ok(DedupDecision::Unique)
    }

    /// Admit a batch of candidates from one source.
    ///
    /// Candidates are independent: a store failure on one is retried with
    /// backoff and then reported for that candidate alone, never failing
    /// the batch. Inserts already committed when a caller aborts mid-batch
    /// are kept; re-running the same batch simply dedupes against them.
    pub async fn ingest_batch(
        &self,
        user_id: Uuid,
        source: TransactionSource,
        candidates: Vec<CandidateTransaction>,
    ) -> IngestReport {
        let batch_id = format!("batch_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let discovered = candidates.len();

        let mut outcomes = Vec::with_capacity(discovered);
        for candidate in candidates {
            outcomes.push(self.process_candidate(user_id, candidate).await);
        }

        let mut report = IngestReport {
            batch_id,
            source,
            discovered,
            accepted: 0,
            duplicates: 0,
            failed: 0,
            rejected: 0,
            outcomes,
        };
        for outcome in &report.outcomes {
            match outcome {
                CandidateOutcome::Accepted { .. } => report.accepted += 1,
                CandidateOutcome::DuplicateSameSource { .. }
                | CandidateOutcome::DuplicateCrossSource { .. } => report.duplicates += 1,
                CandidateOutcome::FailedPendingRetry { .. } => report.failed += 1,
                CandidateOutcome::Rejected { .. } => report.rejected += 1,
            }
        }
        report
    }

    async fn process_candidate(
        &self,
        user_id: Uuid,
        candidate: CandidateTransaction,
    ) -> CandidateOutcome {
        if let Err(reason) = candidate.validate() {
            return CandidateOutcome::Rejected {
                reason: reason.to_string(),
            };
        }

        match self.admit_with_retry(user_id, &candidate).await {
            Ok(outcome) => outcome,
            Err(e) => CandidateOutcome::FailedPendingRetry {
                error: e.to_string(),
            },
        }
    }

    /// Retry transient store failures a bounded number of times before
    /// giving up on this candidate
    async fn admit_with_retry(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<CandidateOutcome> {
        let mut last_error = None;

        for attempt in 0..=self.max_lookup_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt - 1));
                sleep(delay).await;
            }

            match self.admit_once(user_id, candidate).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::store("retries exhausted")))
    }

    async fn admit_once(
        &self,
        user_id: Uuid,
        candidate: &CandidateTransaction,
    ) -> Result<CandidateOutcome> {
        match self.evaluate(user_id, candidate).await? {
            DedupDecision::DuplicateSameSource { existing_id } => {
                Ok(CandidateOutcome::DuplicateSameSource {
                    existing_id: Some(existing_id),
                })
            }
            DedupDecision::DuplicateCrossSource {
                existing_id,
                existing_source,
            } => Ok(CandidateOutcome::DuplicateCrossSource {
                existing_id,
                existing_source,
            }),
            DedupDecision::Unique => {
                let tx = candidate.clone().into_transaction(user_id);
                match self.with_timeout(self.store.insert_transaction(&tx)).await? {
                    InsertOutcome::Inserted => Ok(CandidateOutcome::Accepted {
                        transaction_id: tx.id,
                    }),
                    InsertOutcome::DuplicateKey => {
                        // A concurrent writer committed the same row between
                        // our pre-check and the insert; resolve the winner
                        // for the report when possible.
                        let existing_id = self
                            .with_timeout(self.store.find_same_source(user_id, candidate))
                            .await
                            .ok()
                            .flatten()
                            .map(|t| t.id);
                        Ok(CandidateOutcome::DuplicateSameSource { existing_id })
                    }
                }
            }
        }
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.lookup_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.lookup_timeout.as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryStore;
    use crate::domain::{AccountKind, AccountRef, TransactionKind};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn service_with(store: Arc<InMemoryStore>) -> IngestService {
        IngestService::new(store, &Config::default())
    }

    fn swiggy(source: TransactionSource) -> CandidateTransaction {
        CandidateTransaction {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            description: "Swiggy".to_string(),
            amount: Decimal::new(45000, 2),
            kind: TransactionKind::Expense,
            account: AccountRef::new(AccountKind::BankAccount, "HDFC"),
            source,
            statement_id: None,
        }
    }

    #[tokio::test]
    async fn test_resubmitted_batch_is_fully_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();

        let mut batch = Vec::new();
        for day in 1..=3 {
            let mut c = swiggy(TransactionSource::Statement);
            c.date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            batch.push(c);
        }

        let first = service
            .ingest_batch(user, TransactionSource::Statement, batch.clone())
            .await;
        assert_eq!(first.accepted, 3);
        assert_eq!(first.duplicates, 0);

        // Idempotence: the second run accepts nothing
        let second = service
            .ingest_batch(user, TransactionSource::Statement, batch)
            .await;
        assert_eq!(second.accepted, 0);
        assert_eq!(second.duplicates, 3);
        assert_eq!(store.count_transactions(user).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cross_source_suppression() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();

        // Email sync recorded the purchase first
        let email_tx = swiggy(TransactionSource::Email).into_transaction(user);
        store.insert_transaction(&email_tx).await.unwrap();

        // The statement re-reports it with a differently scaled amount
        let mut from_statement = swiggy(TransactionSource::Statement);
        from_statement.amount = Decimal::new(450, 0);

        let report = service
            .ingest_batch(user, TransactionSource::Statement, vec![from_statement])
            .await;
        assert_eq!(report.accepted, 0);
        assert_eq!(report.duplicates, 1);
        assert!(matches!(
            report.outcomes[0],
            CandidateOutcome::DuplicateCrossSource {
                existing_id,
                existing_source: TransactionSource::Email,
            } if existing_id == email_tx.id
        ));
    }

    #[tokio::test]
    async fn test_evaluate_is_pure() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();

        let decision = service
            .evaluate(user, &swiggy(TransactionSource::Statement))
            .await
            .unwrap();
        assert!(matches!(decision, DedupDecision::Unique));
        assert_eq!(store.count_transactions(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_failure_reports_candidate_as_failed() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();

        // Fail more operations than the retry budget can absorb
        store.fail_next(100);
        let report = service
            .ingest_batch(
                user,
                TransactionSource::Statement,
                vec![swiggy(TransactionSource::Statement)],
            )
            .await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.accepted, 0);
        assert!(matches!(
            report.outcomes[0],
            CandidateOutcome::FailedPendingRetry { .. }
        ));

        // Nothing was inserted and nothing was silently dropped
        store.fail_next(0);
        assert_eq!(store.count_transactions(user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();

        store.fail_next(1);
        let report = service
            .ingest_batch(
                user,
                TransactionSource::Statement,
                vec![swiggy(TransactionSource::Statement)],
            )
            .await;

        assert_eq!(report.accepted, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_one_bad_candidate_does_not_abort_the_batch() {
        let store = Arc::new(InMemoryStore::new());
        let service = service_with(store.clone());
        let user = Uuid::new_v4();

        let mut bad = swiggy(TransactionSource::Statement);
        bad.amount = Decimal::ZERO;
        let mut good = swiggy(TransactionSource::Statement);
        good.date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();

        let report = service
            .ingest_batch(user, TransactionSource::Statement, vec![bad, good])
            .await;

        assert_eq!(report.rejected, 1);
        assert_eq!(report.accepted, 1);
        assert!(matches!(report.outcomes[0], CandidateOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_slow_store_surfaces_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let mut config = Config::default();
        config.lookup_timeout_ms = 20;
        config.max_lookup_retries = 0;
        let service = IngestService::new(store.clone(), &config);
        let user = Uuid::new_v4();

        store.set_delay(Some(Duration::from_millis(200)));
        let result = service
            .evaluate(user, &swiggy(TransactionSource::Statement))
            .await;
        assert!(matches!(result, Err(Error::Timeout(20))));
    }
}
