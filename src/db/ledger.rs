//! Quota ledger row storage
//!
//! A ledger row is the mutable usage counter for one entitlement definition
//! in one context. Rows are created lazily on first write, mutated by the
//! transaction coordinator, reset by the refresh sweeper, and only removed by
//! external cascade.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::definitions::{parse_decimal, parse_opt_decimal};
use crate::error::QuotaError;

/// Where a ledger row lives: scheme-side or pure payment-side.
///
/// The kind is explicit rather than inferred from which reference is null;
/// a scheme-side row may still carry the payment method it was spent through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LedgerContext {
    Scheme {
        scheme_id: String,
        payment_method_id: Option<String>,
    },
    Payment {
        payment_method_id: String,
    },
}

impl LedgerContext {
    /// Column projection: (scheme_ref, payment_method_ref, is_payment_entitlement)
    fn columns(&self) -> (Option<&str>, Option<&str>, bool) {
        match self {
            Self::Scheme {
                scheme_id,
                payment_method_id,
            } => (Some(scheme_id.as_str()), payment_method_id.as_deref(), false),
            Self::Payment { payment_method_id } => (None, Some(payment_method_id.as_str()), true),
        }
    }

    fn from_columns(
        scheme_ref: Option<String>,
        payment_method_ref: Option<String>,
        is_payment: bool,
    ) -> Result<Self, rusqlite::Error> {
        match (is_payment, scheme_ref, payment_method_ref) {
            (false, Some(scheme_id), payment_method_id) => Ok(Self::Scheme {
                scheme_id,
                payment_method_id,
            }),
            (true, None, Some(payment_method_id)) => Ok(Self::Payment { payment_method_id }),
            _ => Err(rusqlite::Error::InvalidQuery),
        }
    }
}

/// One quota ledger row
#[derive(Debug, Clone, Serialize)]
pub struct QuotaLedgerRow {
    pub id: i64,
    pub context: LedgerContext,
    pub entitlement_ref: String,
    pub used_quota: Decimal,
    /// `None` means unlimited
    pub remaining_quota: Option<Decimal>,
    pub accumulated_amount: Decimal,
    pub last_refresh_at: DateTime<Utc>,
    /// `None` means no scheduled reset
    pub next_refresh_at: Option<DateTime<Utc>>,
}

impl QuotaLedgerRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let context = LedgerContext::from_columns(
            row.get("scheme_ref")?,
            row.get("payment_method_ref")?,
            row.get("is_payment_entitlement")?,
        )?;

        Ok(Self {
            id: row.get("id")?,
            context,
            entitlement_ref: row.get("entitlement_ref")?,
            used_quota: parse_decimal(row, "used_quota")?,
            remaining_quota: parse_opt_decimal(row, "remaining_quota")?,
            accumulated_amount: parse_decimal(row, "accumulated_amount")?,
            last_refresh_at: parse_instant(row, "last_refresh_at")?,
            next_refresh_at: parse_opt_instant(row, "next_refresh_at")?,
        })
    }
}

/// Get a ledger row by exact key match
pub fn get_row(
    conn: &Connection,
    context: &LedgerContext,
    entitlement_ref: &str,
) -> Result<Option<QuotaLedgerRow>, QuotaError> {
    let (scheme_ref, payment_method_ref, is_payment) = context.columns();

    let mut stmt = conn.prepare(
        r#"
        SELECT * FROM quota_ledger
        WHERE scheme_ref IS ? AND payment_method_ref IS ?
          AND entitlement_ref = ? AND is_payment_entitlement = ?
        "#,
    )?;
    let mut rows = stmt.query(params![scheme_ref, payment_method_ref, entitlement_ref, is_payment])?;

    match rows.next()? {
        Some(row) => Ok(Some(QuotaLedgerRow::from_row(row)?)),
        None => Ok(None),
    }
}

/// Insert a zero-initialized ledger row and return it
pub fn create_row(
    conn: &Connection,
    context: &LedgerContext,
    entitlement_ref: &str,
    now: DateTime<Utc>,
    next_refresh_at: Option<DateTime<Utc>>,
    quota_limit: Option<Decimal>,
) -> Result<QuotaLedgerRow, QuotaError> {
    let (scheme_ref, payment_method_ref, is_payment) = context.columns();

    conn.execute(
        r#"
        INSERT INTO quota_ledger (
            scheme_ref, payment_method_ref, entitlement_ref, is_payment_entitlement,
            used_quota, remaining_quota, accumulated_amount,
            last_refresh_at, next_refresh_at
        ) VALUES (?, ?, ?, ?, '0', ?, '0', ?, ?)
        "#,
        params![
            scheme_ref,
            payment_method_ref,
            entitlement_ref,
            is_payment,
            quota_limit.map(|q| q.to_string()),
            format_instant(now),
            next_refresh_at.map(format_instant),
        ],
    )?;

    Ok(QuotaLedgerRow {
        id: conn.last_insert_rowid(),
        context: context.clone(),
        entitlement_ref: entitlement_ref.to_string(),
        used_quota: Decimal::ZERO,
        remaining_quota: quota_limit,
        accumulated_amount: Decimal::ZERO,
        last_refresh_at: now,
        next_refresh_at,
    })
}

/// Write new counter values for a row
pub fn update_counters(
    conn: &Connection,
    row_id: i64,
    used_quota: Decimal,
    remaining_quota: Option<Decimal>,
    accumulated_amount: Decimal,
) -> Result<(), QuotaError> {
    let updated = conn.execute(
        r#"
        UPDATE quota_ledger
        SET used_quota = ?, remaining_quota = ?, accumulated_amount = ?
        WHERE id = ?
        "#,
        params![
            used_quota.to_string(),
            remaining_quota.map(|q| q.to_string()),
            accumulated_amount.to_string(),
            row_id,
        ],
    )?;

    if updated == 0 {
        return Err(QuotaError::NotFound(format!("ledger row {}", row_id)));
    }
    Ok(())
}

/// Reset a row's counters for a new refresh period.
///
/// This is the single reset routine shared by the background sweeper and the
/// synchronous read-path due-check, so the two cannot diverge.
pub fn reset_row(
    conn: &Connection,
    row_id: i64,
    quota_limit: Option<Decimal>,
    now: DateTime<Utc>,
    next_refresh_at: Option<DateTime<Utc>>,
) -> Result<(), QuotaError> {
    let updated = conn.execute(
        r#"
        UPDATE quota_ledger
        SET used_quota = '0',
            accumulated_amount = '0',
            remaining_quota = ?,
            last_refresh_at = ?,
            next_refresh_at = ?
        WHERE id = ?
        "#,
        params![
            quota_limit.map(|q| q.to_string()),
            format_instant(now),
            next_refresh_at.map(format_instant),
            row_id,
        ],
    )?;

    if updated == 0 {
        return Err(QuotaError::NotFound(format!("ledger row {}", row_id)));
    }
    Ok(())
}

/// All rows with a scheduled reset pending
pub fn list_pending_refresh(conn: &Connection) -> Result<Vec<QuotaLedgerRow>, QuotaError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM quota_ledger WHERE next_refresh_at IS NOT NULL ORDER BY next_refresh_at",
    )?;
    let rows = stmt.query_map([], QuotaLedgerRow::from_row)?;

    let mut results = vec![];
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

// ---------------------------------------------------------------------------
// Instant columns (RFC 3339 UTC TEXT)
// ---------------------------------------------------------------------------

pub(crate) fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339()
}

fn parse_instant(row: &Row, col: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_opt_instant(row: &Row, col: &str) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LedgerDb;
    use rust_decimal_macros::dec;

    fn scheme_ctx() -> LedgerContext {
        LedgerContext::Scheme {
            scheme_id: "scheme-1".to_string(),
            payment_method_id: None,
        }
    }

    #[test]
    fn test_create_get_update() {
        let db = LedgerDb::open_in_memory().unwrap();
        let now = Utc::now();

        db.with_conn(|conn| {
            let created = create_row(conn, &scheme_ctx(), "def-1", now, None, Some(dec!(100)))?;
            assert_eq!(created.used_quota, Decimal::ZERO);
            assert_eq!(created.remaining_quota, Some(dec!(100)));

            update_counters(conn, created.id, dec!(30), Some(dec!(70)), dec!(1000))?;

            let fetched = get_row(conn, &scheme_ctx(), "def-1")?.unwrap();
            assert_eq!(fetched.id, created.id);
            assert_eq!(fetched.used_quota, dec!(30));
            assert_eq!(fetched.remaining_quota, Some(dec!(70)));
            assert_eq!(fetched.accumulated_amount, dec!(1000));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_scheme_and_payment_keys_are_distinct() {
        let db = LedgerDb::open_in_memory().unwrap();
        let now = Utc::now();
        let payment_ctx = LedgerContext::Payment {
            payment_method_id: "pm-1".to_string(),
        };

        db.with_conn(|conn| {
            create_row(conn, &scheme_ctx(), "def-1", now, None, None)?;
            create_row(conn, &payment_ctx, "def-1", now, None, None)?;

            let scheme_row = get_row(conn, &scheme_ctx(), "def-1")?.unwrap();
            let payment_row = get_row(conn, &payment_ctx, "def-1")?.unwrap();
            assert_ne!(scheme_row.id, payment_row.id);
            assert_eq!(payment_row.context, payment_ctx);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_key_rejected_even_with_null_refs() {
        let db = LedgerDb::open_in_memory().unwrap();
        let now = Utc::now();
        let payment_ctx = LedgerContext::Payment {
            payment_method_id: "pm-1".to_string(),
        };

        db.with_conn(|conn| {
            // scheme context without a payment method: scheme key half is NULL
            create_row(conn, &scheme_ctx(), "def-1", now, None, None)?;
            assert!(create_row(conn, &scheme_ctx(), "def-1", now, None, None).is_err());

            // payment context: scheme_ref is NULL
            create_row(conn, &payment_ctx, "def-1", now, None, None)?;
            assert!(create_row(conn, &payment_ctx, "def-1", now, None, None).is_err());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_reset_row_restores_limit() {
        let db = LedgerDb::open_in_memory().unwrap();
        let now = Utc::now();

        db.with_conn(|conn| {
            let row = create_row(conn, &scheme_ctx(), "def-1", now, Some(now), Some(dec!(100)))?;
            update_counters(conn, row.id, dec!(80), Some(dec!(20)), dec!(4000))?;

            let later = now + chrono::Duration::days(30);
            reset_row(conn, row.id, Some(dec!(100)), later, None)?;

            let fetched = get_row(conn, &scheme_ctx(), "def-1")?.unwrap();
            assert_eq!(fetched.used_quota, Decimal::ZERO);
            assert_eq!(fetched.accumulated_amount, Decimal::ZERO);
            assert_eq!(fetched.remaining_quota, Some(dec!(100)));
            assert_eq!(fetched.last_refresh_at, later);
            assert!(fetched.next_refresh_at.is_none());

            assert!(list_pending_refresh(conn)?.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_instants_round_trip() {
        let db = LedgerDb::open_in_memory().unwrap();
        let now: DateTime<Utc> = "2026-03-14T15:00:00Z".parse().unwrap();

        db.with_conn(|conn| {
            create_row(conn, &scheme_ctx(), "def-1", now, Some(now), None)?;
            let pending = list_pending_refresh(conn)?;
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].next_refresh_at, Some(now));
            assert_eq!(pending[0].last_refresh_at, now);
            Ok(())
        })
        .unwrap();
    }
}
