//! Migration service - applies embedded schema migrations
//!
//! Migrations are SQL files embedded at compile time and tracked in the
//! sys_migrations table so they apply exactly once.

use std::collections::HashSet;

use anyhow::Result;
use duckdb::Connection;

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Names of newly applied migrations
    pub applied: Vec<String>,
    /// Count of migrations that were already applied
    pub already_applied: usize,
}

/// Service for managing database migrations
///
/// The migration set is a parameter so the main store and the event log
/// database share one runner.
pub struct MigrationService<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Run all pending migrations in order, recording each one
    pub fn run_pending(&self, migrations: &[(&str, &str)]) -> Result<MigrationResult> {
        let applied_set = if self.migrations_table_exists()? {
            self.applied_names()?
        } else {
            // Fresh database: the 000 bootstrap creates sys_migrations
            // itself, so start from an empty set and fall through to the
            // normal apply loop.
            HashSet::new()
        };

        let mut newly_applied = Vec::new();
        for (name, sql) in migrations.iter() {
            if applied_set.contains(*name) {
                continue;
            }
            self.conn.execute_batch(sql)?;
            self.conn.execute(
                "INSERT INTO sys_migrations (migration_name) VALUES (?)",
                [name],
            )?;
            newly_applied.push(name.to_string());
        }

        Ok(MigrationResult {
            applied: newly_applied,
            already_applied: applied_set.len(),
        })
    }

    fn migrations_table_exists(&self) -> Result<bool> {
        let result: std::result::Result<i64, _> = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'",
            [],
            |row| row.get(0),
        );
        Ok(result.map(|count| count > 0).unwrap_or(false))
    }

    fn applied_names(&self) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT migration_name FROM sys_migrations")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut result = HashSet::new();
        for name in names {
            result.insert(name?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::MIGRATIONS;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        let service = MigrationService::new(&conn);

        let result = service.run_pending(MIGRATIONS).unwrap();
        assert_eq!(result.applied.len(), MIGRATIONS.len());
        assert_eq!(result.already_applied, 0);

        // Running again applies nothing
        let result = service.run_pending(MIGRATIONS).unwrap();
        assert!(result.applied.is_empty());
        assert_eq!(result.already_applied, MIGRATIONS.len());
    }

    #[test]
    fn test_initial_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        MigrationService::new(&conn).run_pending(MIGRATIONS).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables
                 WHERE table_name IN ('sys_transactions', 'sys_checkpoints')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
