//! Schema migrations
//!
//! Each embedded migration runs in its own transaction together with its
//! `sys_migrations` row, so a failed migration leaves neither schema changes
//! nor a record behind and is retried on the next open.

use duckdb::Connection;
use tracing::{error, info};

use crate::domain::result::{Error, Result};
use crate::migrations::MIGRATIONS;

/// Outcome of one `run_pending` call
#[derive(Debug)]
pub struct MigrationResult {
    /// Migrations applied by this call, in order
    pub applied: Vec<String>,
    /// Migrations found already recorded
    pub already_applied: usize,
}

pub struct MigrationService<'a> {
    conn: &'a Connection,
}

impl<'a> MigrationService<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Apply every migration not yet recorded, in file order
    pub fn run_pending(&self) -> Result<MigrationResult> {
        let recorded = self.recorded()?;
        let mut applied = Vec::new();

        for (name, sql) in MIGRATIONS {
            if recorded.iter().any(|r| r == name) {
                continue;
            }
            self.apply(name, sql)?;
            info!(migration = %name, "applied migration");
            applied.push(name.to_string());
        }

        Ok(MigrationResult {
            already_applied: MIGRATIONS.len() - applied.len(),
            applied,
        })
    }

    /// Names of migrations not yet applied
    pub fn pending(&self) -> Result<Vec<&'static str>> {
        let recorded = self.recorded()?;
        Ok(MIGRATIONS
            .iter()
            .map(|(name, _)| *name)
            .filter(|name| !recorded.iter().any(|r| r == name))
            .collect())
    }

    fn apply(&self, name: &str, sql: &str) -> Result<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;

        let outcome = self.conn.execute_batch(sql).and_then(|_| {
            self.conn.execute(
                "INSERT INTO sys_migrations (migration_name) VALUES (?)",
                [name],
            )
        });

        match outcome {
            Ok(_) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    error!(migration = %name, error = %rollback, "rollback failed");
                }
                Err(Error::database(format!("migration {} failed: {}", name, e)))
            }
        }
    }

    /// Recorded migration names; empty before the bookkeeping table exists
    fn recorded(&self) -> Result<Vec<String>> {
        let exists: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'sys_migrations'",
            [],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Ok(Vec::new());
        }

        let mut stmt = self
            .conn
            .prepare("SELECT migration_name FROM sys_migrations ORDER BY migration_name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }
}
