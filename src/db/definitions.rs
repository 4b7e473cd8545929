//! Entitlement definition read access
//!
//! Definitions are configured by the external catalog; this core reads them
//! to drive reward computation. `insert_definition` exists for the catalog
//! collaborator and for tests.

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::QuotaError;
use crate::reward::RoundingPolicy;
use crate::schedule::RefreshPolicy;

/// Which parent owns a definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionOwner {
    Scheme(String),
    PaymentMethod(String),
}

/// Whether reward is computed per event or against the cumulative period total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationBasis {
    PerTransaction,
    StatementCycle,
}

impl CalculationBasis {
    pub fn parse(s: &str) -> Self {
        match s {
            "statement_cycle" => Self::StatementCycle,
            _ => Self::PerTransaction,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerTransaction => "per_transaction",
            Self::StatementCycle => "statement_cycle",
        }
    }
}

/// An entitlement definition row
#[derive(Debug, Clone, Serialize)]
pub struct EntitlementDefinition {
    pub id: String,
    pub owner: DefinitionOwner,
    pub percentage: Decimal,
    pub rounding_policy: RoundingPolicy,
    pub quota_limit: Option<Decimal>,
    pub basis: CalculationBasis,
    refresh_policy: Option<String>,
    refresh_value: Option<u32>,
    refresh_date: Option<NaiveDate>,
    campaign_end_date: Option<NaiveDate>,
}

impl EntitlementDefinition {
    /// The refresh policy, if the definition has one
    pub fn refresh_policy(&self) -> Option<RefreshPolicy> {
        match self.refresh_policy.as_deref()? {
            "monthly" => Some(RefreshPolicy::Monthly {
                day: self.refresh_value.unwrap_or(1),
            }),
            "date" => Some(RefreshPolicy::FixedDate {
                date: self.refresh_date?,
            }),
            "activity" => Some(RefreshPolicy::CampaignEnd {
                end_date: self.campaign_end_date,
            }),
            _ => None,
        }
    }

    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        let scheme_ref: Option<String> = row.get("scheme_ref")?;
        let payment_method_ref: Option<String> = row.get("payment_method_ref")?;
        let owner = match (scheme_ref, payment_method_ref) {
            (Some(s), _) => DefinitionOwner::Scheme(s),
            (None, Some(p)) => DefinitionOwner::PaymentMethod(p),
            (None, None) => {
                // excluded by the table CHECK constraint
                return Err(rusqlite::Error::InvalidQuery);
            }
        };

        Ok(Self {
            id: row.get("id")?,
            owner,
            percentage: parse_decimal(row, "percentage")?,
            rounding_policy: RoundingPolicy::parse(&row.get::<_, String>("rounding_policy")?),
            quota_limit: parse_opt_decimal(row, "quota_limit")?,
            basis: CalculationBasis::parse(&row.get::<_, String>("calculation_basis")?),
            refresh_policy: row.get("refresh_policy")?,
            refresh_value: row.get("refresh_value")?,
            refresh_date: parse_opt_date(row, "refresh_date")?,
            campaign_end_date: parse_opt_date(row, "campaign_end_date")?,
        })
    }
}

/// Input for seeding a definition
#[derive(Debug, Clone, Deserialize)]
pub struct NewDefinition {
    pub id: String,
    pub owner: DefinitionOwner,
    pub percentage: Decimal,
    #[serde(default)]
    pub rounding_policy: Option<RoundingPolicy>,
    #[serde(default)]
    pub quota_limit: Option<Decimal>,
    #[serde(default)]
    pub basis: Option<CalculationBasis>,
    #[serde(default)]
    pub refresh_policy: Option<String>,
    #[serde(default)]
    pub refresh_value: Option<u32>,
    #[serde(default)]
    pub refresh_date: Option<NaiveDate>,
    #[serde(default)]
    pub campaign_end_date: Option<NaiveDate>,
}

/// Get a definition by ID
pub fn get_definition(conn: &Connection, id: &str) -> Result<Option<EntitlementDefinition>, QuotaError> {
    let mut stmt = conn.prepare("SELECT * FROM entitlement_definitions WHERE id = ?")?;
    let mut rows = stmt.query(params![id])?;

    match rows.next()? {
        Some(row) => Ok(Some(EntitlementDefinition::from_row(row)?)),
        None => Ok(None),
    }
}

/// Definitions owned by a scheme, ordered by percentage descending
pub fn list_for_scheme(conn: &Connection, scheme_id: &str) -> Result<Vec<EntitlementDefinition>, QuotaError> {
    list_where(conn, "scheme_ref = ?", scheme_id)
}

/// Definitions owned by a payment method, ordered by percentage descending
pub fn list_for_payment_method(
    conn: &Connection,
    payment_method_id: &str,
) -> Result<Vec<EntitlementDefinition>, QuotaError> {
    list_where(conn, "payment_method_ref = ?", payment_method_id)
}

fn list_where(conn: &Connection, cond: &str, id: &str) -> Result<Vec<EntitlementDefinition>, QuotaError> {
    // percentage is TEXT; cast for numeric ordering
    let sql = format!(
        "SELECT * FROM entitlement_definitions WHERE {} ORDER BY CAST(percentage AS REAL) DESC, id",
        cond
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![id], EntitlementDefinition::from_row)?;

    let mut results = vec![];
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

/// Insert a definition (seed path for the external catalog and tests)
pub fn insert_definition(conn: &Connection, input: &NewDefinition) -> Result<(), QuotaError> {
    let (scheme_ref, payment_method_ref) = match &input.owner {
        DefinitionOwner::Scheme(id) => (Some(id.as_str()), None),
        DefinitionOwner::PaymentMethod(id) => (None, Some(id.as_str())),
    };

    conn.execute(
        r#"
        INSERT INTO entitlement_definitions (
            id, scheme_ref, payment_method_ref, percentage, rounding_policy,
            quota_limit, calculation_basis, refresh_policy, refresh_value,
            refresh_date, campaign_end_date
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.id,
            scheme_ref,
            payment_method_ref,
            input.percentage.to_string(),
            input.rounding_policy.unwrap_or(RoundingPolicy::None).as_str(),
            input.quota_limit.map(|q| q.to_string()),
            input.basis.unwrap_or(CalculationBasis::PerTransaction).as_str(),
            input.refresh_policy,
            input.refresh_value,
            input.refresh_date.map(|d| d.to_string()),
            input.campaign_end_date.map(|d| d.to_string()),
        ],
    )?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Column parsing helpers (TEXT decimals and dates)
// ---------------------------------------------------------------------------

pub(crate) fn parse_decimal(row: &Row, col: &str) -> Result<Decimal, rusqlite::Error> {
    let raw: String = row.get(col)?;
    raw.parse().map_err(|e: rust_decimal::Error| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_opt_decimal(row: &Row, col: &str) -> Result<Option<Decimal>, rusqlite::Error> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        s.parse().map_err(|e: rust_decimal::Error| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn parse_opt_date(row: &Row, col: &str) -> Result<Option<NaiveDate>, rusqlite::Error> {
    let raw: Option<String> = row.get(col)?;
    raw.map(|s| {
        s.parse().map_err(|e: chrono::ParseError| {
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

    fn seed(db: &LedgerDb, input: &NewDefinition) {
        db.with_conn(|conn| insert_definition(conn, input)).unwrap();
    }

    fn basic(id: &str, scheme: &str, pct: Decimal) -> NewDefinition {
        NewDefinition {
            id: id.to_string(),
            owner: DefinitionOwner::Scheme(scheme.to_string()),
            percentage: pct,
            rounding_policy: Some(RoundingPolicy::Round),
            quota_limit: Some(dec!(100)),
            basis: Some(CalculationBasis::PerTransaction),
            refresh_policy: None,
            refresh_value: None,
            refresh_date: None,
            campaign_end_date: None,
        }
    }

    #[test]
    fn test_round_trip_and_ordering() {
        let db = LedgerDb::open_in_memory().unwrap();
        seed(&db, &basic("def-low", "scheme-1", dec!(1.5)));
        seed(&db, &basic("def-high", "scheme-1", dec!(10)));

        let defs = db
            .with_conn(|conn| list_for_scheme(conn, "scheme-1"))
            .unwrap();
        assert_eq!(defs.len(), 2);
        // numeric ordering, not text: 10 before 1.5
        assert_eq!(defs[0].id, "def-high");
        assert_eq!(defs[0].percentage, dec!(10));
        assert_eq!(defs[1].percentage, dec!(1.5));
        assert_eq!(defs[0].quota_limit, Some(dec!(100)));
    }

    #[test]
    fn test_refresh_policy_mapping() {
        let db = LedgerDb::open_in_memory().unwrap();
        let mut input = basic("def-monthly", "scheme-1", dec!(3));
        input.refresh_policy = Some("monthly".to_string());
        input.refresh_value = Some(15);
        seed(&db, &input);

        let def = db
            .with_conn(|conn| get_definition(conn, "def-monthly"))
            .unwrap()
            .unwrap();
        assert_eq!(def.refresh_policy(), Some(RefreshPolicy::Monthly { day: 15 }));

        let none = db
            .with_conn(|conn| get_definition(conn, "missing"))
            .unwrap();
        assert!(none.is_none());
    }
}
