//! CLI command implementations

pub mod checkpoint;
pub mod ingest;
pub mod logs;
pub mod project;
pub mod status;

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use uuid::Uuid;

use tally_core::services::ReconcileEvent;
use tally_core::TallyContext;

/// Get the tally directory from environment or default
pub fn get_tally_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("TALLY_DIR") {
        PathBuf::from(dir)
    } else {
        dirs::home_dir()
            .expect("Could not find home directory")
            .join(".tally")
    }
}

/// Get or create the tally context
pub fn get_context() -> Result<TallyContext> {
    let tally_dir = get_tally_dir();

    std::fs::create_dir_all(&tally_dir)
        .with_context(|| format!("Failed to create tally directory: {:?}", tally_dir))?;

    TallyContext::new(&tally_dir)
}

/// Resolve the user scope for this invocation.
///
/// Local single-user installs run under the nil scope; TALLY_USER switches
/// scope on shared machines. Every store lookup downstream is bound to the
/// resolved scope.
pub fn get_user_scope() -> Result<Uuid> {
    match std::env::var("TALLY_USER") {
        Ok(raw) => Uuid::from_str(&raw).context("TALLY_USER must be a UUID"),
        Err(_) => Ok(Uuid::nil()),
    }
}

/// Log an event, ignoring any errors (logging must never break a command)
pub fn log_event(ctx: &TallyContext, event: ReconcileEvent) {
    let _ = ctx.logging_service.log(event);
}
