//! Transaction quota coordinator
//!
//! Applies and reverses quota consumption when a spend event is created or
//! deleted. All per-definition ledger updates for one event happen inside a
//! single database transaction: any failure discards the whole event's quota
//! effects along with the event itself, per the enclosing request's atomicity
//! contract.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::db::{definitions, ledger, mappings, EntitlementDefinition, LedgerContext, LedgerDb};
use crate::db::definitions::CalculationBasis;
use crate::error::QuotaError;
use crate::reward::{marginal_reward, reward};
use crate::schedule::RefreshSchedule;

/// A spend event as seen by the quota core: an amount plus its context.
/// Scheme-side and payment-side entitlements may both apply.
#[derive(Debug, Clone, Deserialize)]
pub struct SpendEvent {
    pub event_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub scheme_id: Option<String>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

/// The effect one definition had when an event was applied
#[derive(Debug, Clone)]
pub struct AppliedDelta {
    pub entitlement_id: String,
    pub context: LedgerContext,
    pub delta: Decimal,
    pub used_quota: Decimal,
    pub remaining_quota: Option<Decimal>,
}

/// Manual used-quota adjustment input
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaAdjustment {
    /// Absolute value ("30") or signed delta ("+5", "-3") against the current value
    pub used_quota: String,
    /// Only honored for unlimited definitions, where remaining cannot be derived
    #[serde(default)]
    pub remaining_quota: Option<Decimal>,
}

enum AdjustValue {
    Absolute(Decimal),
    Delta(Decimal),
}

/// Coordinates ledger mutation for spend-event create/delete and manual sets
pub struct QuotaCoordinator {
    db: Arc<LedgerDb>,
    schedule: RefreshSchedule,
}

impl QuotaCoordinator {
    pub fn new(db: Arc<LedgerDb>, schedule: RefreshSchedule) -> Self {
        Self { db, schedule }
    }

    /// Debit every applicable ledger row for a newly created spend event.
    ///
    /// Rows are created zero-initialized on first touch, including their
    /// initial next-refresh instant. Negative remaining quota (overspend) is
    /// preserved, not clamped.
    pub fn apply_event(&self, event: &SpendEvent) -> Result<Vec<AppliedDelta>, QuotaError> {
        if event.amount < Decimal::ZERO {
            return Err(QuotaError::InvalidInput(format!(
                "event {} has negative amount {}",
                event.event_id, event.amount
            )));
        }

        let now = Utc::now();
        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let applicable = applicable_definitions(&tx, event)?;
            let mut applied = Vec::with_capacity(applicable.len());

            for (def, context) in applicable {
                let row = self.get_or_create_row(&tx, &context, &def, now)?;

                let delta = match def.basis {
                    CalculationBasis::PerTransaction => {
                        reward(event.amount, def.percentage, def.rounding_policy)
                    }
                    CalculationBasis::StatementCycle => marginal_reward(
                        row.accumulated_amount,
                        event.amount,
                        def.percentage,
                        def.rounding_policy,
                    ),
                };

                let used = row.used_quota + delta;
                let accumulated = row.accumulated_amount + event.amount;
                let remaining = def.quota_limit.map(|limit| limit - used);

                ledger::update_counters(&tx, row.id, used, remaining, accumulated)?;
                debug!(
                    event = %event.event_id,
                    entitlement = %def.id,
                    %delta,
                    %used,
                    "applied quota delta"
                );

                applied.push(AppliedDelta {
                    entitlement_id: def.id,
                    context,
                    delta,
                    used_quota: used,
                    remaining_quota: remaining,
                });
            }

            tx.commit()?;
            Ok(applied)
        })
    }

    /// Credit back every applicable ledger row when a spend event is deleted.
    ///
    /// The rollback amount is the same reward formula evaluated at the
    /// increment's position in the cumulative curve, so it removes exactly
    /// what `apply_event` added. Used quota is clamped at zero; missing rows
    /// are skipped silently (nothing to roll back).
    pub fn rollback_event(&self, event: &SpendEvent) -> Result<(), QuotaError> {
        if event.amount < Decimal::ZERO {
            return Err(QuotaError::InvalidInput(format!(
                "event {} has negative amount {}",
                event.event_id, event.amount
            )));
        }

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for (def, context) in applicable_definitions(&tx, event)? {
                let Some(row) = ledger::get_row(&tx, &context, &def.id)? else {
                    continue;
                };

                let new_accumulated = (row.accumulated_amount - event.amount).max(Decimal::ZERO);
                let rollback = match def.basis {
                    CalculationBasis::PerTransaction => {
                        reward(event.amount, def.percentage, def.rounding_policy)
                    }
                    CalculationBasis::StatementCycle => marginal_reward(
                        new_accumulated,
                        event.amount,
                        def.percentage,
                        def.rounding_policy,
                    ),
                };

                let used = (row.used_quota - rollback).max(Decimal::ZERO);
                let remaining = def.quota_limit.map(|limit| limit - used);

                ledger::update_counters(&tx, row.id, used, remaining, new_accumulated)?;
                debug!(
                    event = %event.event_id,
                    entitlement = %def.id,
                    %rollback,
                    %used,
                    "rolled back quota delta"
                );
            }

            tx.commit()?;
            Ok(())
        })
    }

    /// Set used quota directly, bypassing event-derived calculation.
    ///
    /// Exists for manual corrections; remaining quota is recomputed with the
    /// same formula the automatic paths use. Scheme contexts are redirected
    /// through the shared reward mapping like every other mutation.
    pub fn adjust_used_quota(
        &self,
        context: &LedgerContext,
        entitlement_id: &str,
        input: &QuotaAdjustment,
    ) -> Result<ledger::QuotaLedgerRow, QuotaError> {
        let value = parse_adjust_value(&input.used_quota)?;
        let now = Utc::now();

        self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let def = definitions::get_definition(&tx, entitlement_id)?
                .ok_or_else(|| QuotaError::NotFound(format!("entitlement {}", entitlement_id)))?;

            let context = redirect_context(&tx, context)?;
            let row = self.get_or_create_row(&tx, &context, &def, now)?;

            let used = match value {
                AdjustValue::Absolute(v) => v,
                AdjustValue::Delta(d) => (row.used_quota + d).max(Decimal::ZERO),
            };
            let remaining = match def.quota_limit {
                Some(limit) => Some(limit - used),
                None => input.remaining_quota.or(row.remaining_quota),
            };

            ledger::update_counters(&tx, row.id, used, remaining, row.accumulated_amount)?;
            tx.commit()?;

            Ok(ledger::QuotaLedgerRow {
                used_quota: used,
                remaining_quota: remaining,
                ..row
            })
        })
    }

    fn get_or_create_row(
        &self,
        conn: &Connection,
        context: &LedgerContext,
        def: &EntitlementDefinition,
        now: DateTime<Utc>,
    ) -> Result<ledger::QuotaLedgerRow, QuotaError> {
        if let Some(row) = ledger::get_row(conn, context, &def.id)? {
            return Ok(row);
        }
        let next_refresh = def
            .refresh_policy()
            .and_then(|policy| self.schedule.next_refresh(&policy, now));
        ledger::create_row(conn, context, &def.id, now, next_refresh, def.quota_limit)
    }
}

/// Every definition that applies to an event, paired with the ledger context
/// its row lives under. Scheme references are redirected through the shared
/// reward mapping before lookup.
fn applicable_definitions(
    conn: &Connection,
    event: &SpendEvent,
) -> Result<Vec<(EntitlementDefinition, LedgerContext)>, QuotaError> {
    let mut out = vec![];

    if let Some(scheme_id) = &event.scheme_id {
        let canonical = mappings::resolve_target(conn, scheme_id)?;
        for def in definitions::list_for_scheme(conn, &canonical)? {
            out.push((
                def,
                LedgerContext::Scheme {
                    scheme_id: canonical.clone(),
                    payment_method_id: event.payment_method_id.clone(),
                },
            ));
        }
    }

    if let Some(payment_method_id) = &event.payment_method_id {
        for def in definitions::list_for_payment_method(conn, payment_method_id)? {
            out.push((
                def,
                LedgerContext::Payment {
                    payment_method_id: payment_method_id.clone(),
                },
            ));
        }
    }

    Ok(out)
}

/// Redirect a scheme context through the shared reward mapping
pub(crate) fn redirect_context(
    conn: &Connection,
    context: &LedgerContext,
) -> Result<LedgerContext, QuotaError> {
    match context {
        LedgerContext::Scheme {
            scheme_id,
            payment_method_id,
        } => Ok(LedgerContext::Scheme {
            scheme_id: mappings::resolve_target(conn, scheme_id)?,
            payment_method_id: payment_method_id.clone(),
        }),
        other => Ok(other.clone()),
    }
}

fn parse_adjust_value(raw: &str) -> Result<AdjustValue, QuotaError> {
    let raw = raw.trim();
    let bad = || QuotaError::InvalidInput(format!("bad used_quota value: {:?}", raw));

    match raw.as_bytes().first() {
        Some(b'+') => raw[1..].parse().map(AdjustValue::Delta).map_err(|_| bad()),
        Some(b'-') => raw[1..]
            .parse::<Decimal>()
            .map(|d| AdjustValue::Delta(-d))
            .map_err(|_| bad()),
        Some(_) => {
            let value: Decimal = raw.parse().map_err(|_| bad())?;
            if value < Decimal::ZERO {
                return Err(bad());
            }
            Ok(AdjustValue::Absolute(value))
        }
        None => Err(bad()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_adjust_value() {
        assert!(matches!(parse_adjust_value("30").unwrap(), AdjustValue::Absolute(v) if v == dec!(30)));
        assert!(matches!(parse_adjust_value("+5").unwrap(), AdjustValue::Delta(v) if v == dec!(5)));
        assert!(matches!(parse_adjust_value("-3.5").unwrap(), AdjustValue::Delta(v) if v == dec!(-3.5)));
        assert!(parse_adjust_value("").is_err());
        assert!(parse_adjust_value("abc").is_err());
        assert!(parse_adjust_value("+abc").is_err());
    }
}
