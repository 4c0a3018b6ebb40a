//! # State Database
//!
//! In-memory SQLite database backing the versioned state store.
//! Lives for the lifetime of the process; nothing is written to disk.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Shared handle to one in-memory state database
pub struct StateDb {
    conn: Arc<Mutex<Connection>>,
}

impl StateDb {
    /// Open a fresh in-memory database with the schema applied
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open state database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Get a shared connection for use by other modules
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < SCHEMA_VERSION {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    /// Migration to version 1 - append-only state log
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // AUTOINCREMENT: a version number is never handed out twice
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS state_versions (
                version INTEGER PRIMARY KEY AUTOINCREMENT,
                case_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                refinement_status TEXT NOT NULL,
                rolled_back_from INTEGER,
                state TEXT NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute_batch(
            r#"
            CREATE TRIGGER IF NOT EXISTS state_versions_no_update
            BEFORE UPDATE ON state_versions
            BEGIN
                SELECT RAISE(ABORT, 'state versions are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS state_versions_no_delete
            BEFORE DELETE ON state_versions
            BEGIN
                SELECT RAISE(ABORT, 'state versions are immutable');
            END;
            "#,
        )?;

        tracing::debug!("State database schema v1 applied");

        Ok(())
    }
}
