//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::QuotaError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), QuotaError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, QuotaError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), QuotaError> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), QuotaError> {
    conn.execute_batch(DEFINITIONS_SCHEMA)?;
    conn.execute_batch(LEDGER_SCHEMA)?;
    conn.execute_batch(INDEXES_SCHEMA)?;
    Ok(())
}

/// Migrate schema from an older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<(), QuotaError> {
    match from_version {
        // migration steps go here as the schema evolves
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Entitlement definitions. Managed by the external catalog; this core only
/// reads them (the insert path exists for the catalog collaborator and tests).
const DEFINITIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entitlement_definitions (
    id TEXT PRIMARY KEY NOT NULL,

    -- Owner: exactly one of scheme or payment method
    scheme_ref TEXT,
    payment_method_ref TEXT,

    -- Decimals stored as TEXT for lossless round-trip
    percentage TEXT NOT NULL,
    rounding_policy TEXT NOT NULL DEFAULT 'none',
    quota_limit TEXT,

    calculation_basis TEXT NOT NULL DEFAULT 'per_transaction',

    -- Refresh policy: 'monthly' uses refresh_value (day of month),
    -- 'date' uses refresh_date, 'activity' uses campaign_end_date
    refresh_policy TEXT,
    refresh_value INTEGER,
    refresh_date TEXT,
    campaign_end_date TEXT,

    CHECK ((scheme_ref IS NULL) != (payment_method_ref IS NULL))
);
"#;

/// Quota ledger rows and shared reward mapping edges
const LEDGER_SCHEMA: &str = r#"
-- Usage counters, keyed by (context, entitlement definition).
-- All decimal columns are TEXT; all instants are RFC 3339 UTC.
CREATE TABLE IF NOT EXISTS quota_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,

    scheme_ref TEXT,
    payment_method_ref TEXT,
    entitlement_ref TEXT NOT NULL,
    is_payment_entitlement INTEGER NOT NULL DEFAULT 0,

    used_quota TEXT NOT NULL DEFAULT '0',
    remaining_quota TEXT,
    accumulated_amount TEXT NOT NULL DEFAULT '0',

    last_refresh_at TEXT NOT NULL,
    next_refresh_at TEXT
);

-- SQLite treats NULLs as distinct in plain UNIQUE constraints, so the key
-- columns go through COALESCE to make absent references collide
CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_key ON quota_ledger(
    COALESCE(scheme_ref, ''),
    COALESCE(payment_method_ref, ''),
    entitlement_ref,
    is_payment_entitlement
);

-- Depth-1 redirection: a scheme is a root or points directly at one
CREATE TABLE IF NOT EXISTS shared_reward_mappings (
    scheme_ref TEXT PRIMARY KEY NOT NULL,
    root_scheme_ref TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_definitions_scheme ON entitlement_definitions(scheme_ref);
CREATE INDEX IF NOT EXISTS idx_definitions_payment_method ON entitlement_definitions(payment_method_ref);

CREATE INDEX IF NOT EXISTS idx_ledger_entitlement ON quota_ledger(entitlement_ref);
CREATE INDEX IF NOT EXISTS idx_ledger_pending_refresh ON quota_ledger(next_refresh_at)
    WHERE next_refresh_at IS NOT NULL;
"#;
