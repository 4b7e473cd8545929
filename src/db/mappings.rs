//! Shared reward mapping edges
//!
//! A mapping redirects one scheme's entitlement reads and writes to another
//! scheme's canonical set within the same parent card. The graph is depth 1:
//! a scheme is either a root or points directly at one.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::QuotaError;

/// The canonical scheme whose ledger actually accumulates usage for
/// `scheme_id`: the mapped root if one exists, else the input unchanged.
pub fn resolve_target(conn: &Connection, scheme_id: &str) -> Result<String, QuotaError> {
    let root: Option<String> = conn
        .query_row(
            "SELECT root_scheme_ref FROM shared_reward_mappings WHERE scheme_ref = ?",
            params![scheme_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(root.unwrap_or_else(|| scheme_id.to_string()))
}

/// Upsert or clear the mapping for `scheme_id`.
///
/// `None` or a self-reference deletes any existing edge. Ownership
/// validation (same parent card) is the caller's concern at configuration
/// time, not this table's.
pub fn set_mapping(conn: &Connection, scheme_id: &str, root: Option<&str>) -> Result<(), QuotaError> {
    match root {
        Some(root) if root != scheme_id => {
            conn.execute(
                r#"
                INSERT INTO shared_reward_mappings (scheme_ref, root_scheme_ref)
                VALUES (?, ?)
                ON CONFLICT(scheme_ref) DO UPDATE SET root_scheme_ref = excluded.root_scheme_ref
                "#,
                params![scheme_id, root],
            )?;
        }
        _ => {
            conn.execute(
                "DELETE FROM shared_reward_mappings WHERE scheme_ref = ?",
                params![scheme_id],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;

    #[test]
    fn test_unmapped_scheme_resolves_to_itself() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert_eq!(resolve_target(conn, "scheme-a")?, "scheme-a");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_mapping_upsert_and_clear() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            set_mapping(conn, "scheme-a", Some("scheme-b"))?;
            assert_eq!(resolve_target(conn, "scheme-a")?, "scheme-b");

            set_mapping(conn, "scheme-a", Some("scheme-c"))?;
            assert_eq!(resolve_target(conn, "scheme-a")?, "scheme-c");

            set_mapping(conn, "scheme-a", None)?;
            assert_eq!(resolve_target(conn, "scheme-a")?, "scheme-a");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_self_mapping_normalized_away() {
        let db = LedgerDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            set_mapping(conn, "scheme-a", Some("scheme-b"))?;
            // self-reference clears the edge rather than storing a loop
            set_mapping(conn, "scheme-a", Some("scheme-a"))?;
            assert_eq!(resolve_target(conn, "scheme-a")?, "scheme-a");
            Ok(())
        })
        .unwrap();
    }
}
