//! SQLite database module for the quota ledger
//!
//! One connection behind a mutex; every multi-statement mutation runs inside
//! an explicit transaction obtained through `with_conn_mut`. Read-modify-write
//! of a ledger row always happens within the same transaction as the read.
//!
//! ## Tables
//!
//! - `entitlement_definitions` - reward configuration (read-only to this core)
//! - `quota_ledger` - mutable usage counters per (context, definition)
//! - `shared_reward_mappings` - scheme -> root scheme redirection edges

pub mod schema;
pub mod definitions;
pub mod ledger;
pub mod mappings;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::QuotaError;

/// SQLite database handle for the quota ledger
pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    /// Open or create the ledger database
    pub fn open(db_path: &Path) -> Result<Self, QuotaError> {
        info!("Opening SQLite ledger database at {:?}", db_path);

        let conn = Connection::open(db_path)?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, QuotaError> {
        debug!("Opening in-memory SQLite ledger database");

        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn init_schema(&self) -> Result<(), QuotaError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, QuotaError>
    where
        F: FnOnce(&Connection) -> Result<T, QuotaError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| QuotaError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a write operation with exclusive access (for transactions)
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, QuotaError>
    where
        F: FnOnce(&mut Connection) -> Result<T, QuotaError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| QuotaError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, QuotaError> {
        self.with_conn(|conn| {
            let definition_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM entitlement_definitions", [], |row| row.get(0))?;
            let ledger_row_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM quota_ledger", [], |row| row.get(0))?;
            let pending_refresh_count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM quota_ledger WHERE next_refresh_at IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            let mapping_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM shared_reward_mappings", [], |row| row.get(0))?;

            Ok(DbStats {
                definition_count: definition_count as u64,
                ledger_row_count: ledger_row_count as u64,
                pending_refresh_count: pending_refresh_count as u64,
                mapping_count: mapping_count as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub definition_count: u64,
    pub ledger_row_count: u64,
    pub pending_refresh_count: u64,
    pub mapping_count: u64,
}

// Re-exports
pub use definitions::{CalculationBasis, DefinitionOwner, EntitlementDefinition, NewDefinition};
pub use ledger::{LedgerContext, QuotaLedgerRow};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[test]
    fn test_file_backed_open_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("quota.db");
        let ctx = LedgerContext::Scheme {
            scheme_id: "scheme-1".to_string(),
            payment_method_id: None,
        };
        let now = Utc::now();

        {
            let db = LedgerDb::open(&db_path).unwrap();
            db.with_conn(|conn| {
                let row = ledger::create_row(conn, &ctx, "def-1", now, None, Some(dec!(100)))?;
                ledger::update_counters(conn, row.id, dec!(30), Some(dec!(70)), dec!(1000))
            })
            .unwrap();
        }

        // reopening runs init_schema against the existing file and sees the data
        let db = LedgerDb::open(&db_path).unwrap();
        let row = db
            .with_conn(|conn| ledger::get_row(conn, &ctx, "def-1"))
            .unwrap()
            .unwrap();
        assert_eq!(row.used_quota, dec!(30));
        assert_eq!(row.remaining_quota, Some(dec!(70)));
        assert_eq!(row.accumulated_amount, dec!(1000));

        let stats = db.stats().unwrap();
        assert_eq!(stats.ledger_row_count, 1);
        assert_eq!(stats.pending_refresh_count, 0);
    }
}
