//! Reward amount calculation
//!
//! Pure decimal math for percentage-based reward entitlements. Two shapes:
//!
//! - `reward` - the reward earned by a single amount under one rounding policy
//! - `marginal_reward` - the reward attributable to a new increment given an
//!   already-accumulated base, used for statement-cycle entitlements where
//!   rounding applies to the cumulative total rather than each transaction
//!
//! Everything here is `rust_decimal` arithmetic, so forward and inverse
//! applications cancel exactly.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// How a computed raw reward value is rounded to a ledger amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingPolicy {
    /// Nearest integer, midpoint away from zero
    Round,
    /// Truncate down
    Floor,
    /// Truncate up
    Ceil,
    /// Raw value passes through unrounded
    None,
}

impl RoundingPolicy {
    /// Parse a stored policy string; unrecognized values pass raw through
    pub fn parse(s: &str) -> Self {
        match s {
            "round" => Self::Round,
            "floor" => Self::Floor,
            "ceil" => Self::Ceil,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Round => "round",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::None => "none",
        }
    }
}

/// Reward for `amount` at `percentage`, under `policy`
pub fn reward(amount: Decimal, percentage: Decimal, policy: RoundingPolicy) -> Decimal {
    let raw = amount * percentage / Decimal::ONE_HUNDRED;
    match policy {
        RoundingPolicy::Round => raw.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        RoundingPolicy::Floor => raw.floor(),
        RoundingPolicy::Ceil => raw.ceil(),
        RoundingPolicy::None => raw,
    }
}

/// Reward attributable to `increment` on top of `accumulated_base`.
///
/// Evaluated as `reward(base + increment) - reward(base)`, so the rounding
/// applies to the cumulative total and the Nth increment earns the marginal
/// increase of the rounded curve. Reversing a statement-cycle delta calls
/// this with the post-reversal base, which removes exactly what was added.
pub fn marginal_reward(
    accumulated_base: Decimal,
    increment: Decimal,
    percentage: Decimal,
    policy: RoundingPolicy,
) -> Decimal {
    reward(accumulated_base + increment, percentage, policy) - reward(accumulated_base, percentage, policy)
}

/// One percentage/policy component of a parallel reward computation
#[derive(Debug, Clone, Copy)]
pub struct RewardComponent {
    pub percentage: Decimal,
    pub policy: RoundingPolicy,
}

/// One line of a `total_reward` breakdown
#[derive(Debug, Clone, Serialize)]
pub struct RewardLine {
    pub percentage: Decimal,
    pub amount: Decimal,
}

/// Total reward across independent components, with per-component breakdown
#[derive(Debug, Clone, Serialize)]
pub struct RewardBreakdown {
    pub total: Decimal,
    pub breakdown: Vec<RewardLine>,
}

/// Sum independent `reward()` calls across parallel entitlement components.
/// Preview/what-if only; never feeds ledger mutation.
pub fn total_reward(amount: Decimal, components: &[RewardComponent]) -> RewardBreakdown {
    let breakdown: Vec<RewardLine> = components
        .iter()
        .map(|c| RewardLine {
            percentage: c.percentage,
            amount: reward(amount, c.percentage, c.policy),
        })
        .collect();
    let total = breakdown.iter().map(|l| l.amount).sum();
    RewardBreakdown { total, breakdown }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_policy_ordering() {
        // floor <= round <= ceil, within one unit
        for (amount, pct) in [(dec!(199), dec!(5)), (dec!(1000), dec!(3)), (dec!(33), dec!(7.5))] {
            let f = reward(amount, pct, RoundingPolicy::Floor);
            let r = reward(amount, pct, RoundingPolicy::Round);
            let c = reward(amount, pct, RoundingPolicy::Ceil);
            assert!(f <= r && r <= c, "{} {} -> {} {} {}", amount, pct, f, r, c);
            assert!(c - f <= Decimal::ONE);
        }
    }

    #[test]
    fn test_integral_value_unchanged_by_any_policy() {
        // 1000 * 3% = 30 exactly
        for policy in [RoundingPolicy::Round, RoundingPolicy::Floor, RoundingPolicy::Ceil, RoundingPolicy::None] {
            assert_eq!(reward(dec!(1000), dec!(3), policy), dec!(30));
        }
    }

    #[test]
    fn test_round_is_commercial_not_bankers() {
        // 50 * 5% = 2.5 rounds away from zero
        assert_eq!(reward(dec!(50), dec!(5), RoundingPolicy::Round), dec!(3));
    }

    #[test]
    fn test_unrecognized_policy_passes_raw_through() {
        assert_eq!(RoundingPolicy::parse("truncate"), RoundingPolicy::None);
        assert_eq!(reward(dec!(199), dec!(5), RoundingPolicy::None), dec!(9.95));
    }

    #[test]
    fn test_marginal_statement_cycle_scenario() {
        // 5% floor, two events of 199: 9 then 10, total 19 = floor(398 * 0.05)
        let first = marginal_reward(dec!(0), dec!(199), dec!(5), RoundingPolicy::Floor);
        let second = marginal_reward(dec!(199), dec!(199), dec!(5), RoundingPolicy::Floor);
        assert_eq!(first, dec!(9));
        assert_eq!(second, dec!(10));
        assert_eq!(first + second, reward(dec!(398), dec!(5), RoundingPolicy::Floor));
    }

    #[test]
    fn test_marginal_additivity() {
        // marginal(0, a) + marginal(a, b) == reward(a + b) for every policy
        let cases = [(dec!(123.45), dec!(678.9)), (dec!(1), dec!(1)), (dec!(0), dec!(57))];
        for policy in [RoundingPolicy::Round, RoundingPolicy::Floor, RoundingPolicy::Ceil, RoundingPolicy::None] {
            for (a, b) in cases {
                let split = marginal_reward(dec!(0), a, dec!(7), policy) + marginal_reward(a, b, dec!(7), policy);
                assert_eq!(split, reward(a + b, dec!(7), policy));
            }
        }
    }

    #[test]
    fn test_apply_then_reverse_restores_state() {
        let mut used = dec!(18);
        let mut accumulated = dec!(370);
        let inc = dec!(199);

        let delta = marginal_reward(accumulated, inc, dec!(5), RoundingPolicy::Floor);
        used += delta;
        accumulated += inc;

        // reverse: recompute the marginal at the increment's position in the curve
        let new_accumulated = accumulated - inc;
        used -= marginal_reward(new_accumulated, inc, dec!(5), RoundingPolicy::Floor);
        accumulated = new_accumulated;

        assert_eq!(used, dec!(18));
        assert_eq!(accumulated, dec!(370));
    }

    #[test]
    fn test_total_reward_breakdown() {
        let components = [
            RewardComponent { percentage: dec!(3), policy: RoundingPolicy::Round },
            RewardComponent { percentage: dec!(1.5), policy: RoundingPolicy::Floor },
        ];
        let result = total_reward(dec!(1000), &components);
        assert_eq!(result.breakdown.len(), 2);
        assert_eq!(result.breakdown[0].amount, dec!(30));
        assert_eq!(result.breakdown[1].amount, dec!(15));
        assert_eq!(result.total, dec!(45));
    }

    #[test]
    fn test_zero_amount_and_percentage() {
        assert_eq!(reward(dec!(0), dec!(5), RoundingPolicy::Round), dec!(0));
        assert_eq!(reward(dec!(500), dec!(0), RoundingPolicy::Ceil), dec!(0));
    }
}
