//! Tally Core - reconciliation logic for multi-source personal finance data
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Transaction, BalanceCheckpoint, etc.)
//! - **ports**: Trait definitions for external dependencies (TransactionStore)
//! - **services**: Business logic orchestration (ingest, projection, checkpoints)
//! - **adapters**: Concrete implementations (DuckDB, in-memory)
//!
//! Transactions arrive asynchronously from overlapping sources (statement
//! upload, email sync, manual entry). The ingest service keeps the canonical
//! store free of duplicates; the projection service rolls statement
//! checkpoints forward over the expense log to produce live balances.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use adapters::duckdb::DuckDbStore;
use config::Config;
use ports::TransactionStore;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::Error;
pub use domain::{
    AccountKind, AccountRef, BalanceCheckpoint, CandidateTransaction, StatementMonth, Transaction,
    TransactionKind, TransactionSource,
};

/// Main context for Tally operations
///
/// This is the primary entry point for all business logic. The process
/// entry point owns it; the store client is constructed once here and
/// injected into every service, never reached through globals.
pub struct TallyContext {
    pub config: Config,
    pub store: Arc<DuckDbStore>,
    pub ingest_service: IngestService,
    pub projection_service: ProjectionService,
    pub checkpoint_service: CheckpointService,
    pub status_service: StatusService,
    pub logging_service: LoggingService,
}

impl TallyContext {
    /// Create a new Tally context rooted at the given data directory
    pub fn new(tally_dir: &Path) -> Result<Self> {
        let config = Config::load(tally_dir)?;

        let db_path = tally_dir.join("tally.duckdb");
        let store = Arc::new(DuckDbStore::new(&db_path)?);

        // Initialize schema
        store.ensure_schema()?;

        // Create services against the store port
        let port: Arc<dyn TransactionStore> = store.clone();
        let ingest_service = IngestService::new(port.clone(), &config);
        let projection_service = ProjectionService::new(port.clone(), &config);
        let checkpoint_service = CheckpointService::new(port.clone(), &config);
        let status_service = StatusService::new(port);
        let logging_service = LoggingService::new(tally_dir)?;

        Ok(Self {
            config,
            store,
            ingest_service,
            projection_service,
            checkpoint_service,
            status_service,
            logging_service,
        })
    }
}
