//! Commission split computation for validated conversions.
//!
//! Pure: no I/O, no error cases. A referrer may override how the combined
//! commission is split, but only when the event allows it, and only within
//! the event's clamp bounds. The combined total never changes.

use std::collections::HashMap;
use uuid::Uuid;

use crate::types::EventRule;

/// Final commission amounts for one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommissionSplit {
    /// Amount owed to the end-user.
    pub user: i64,
    /// Amount owed to the referrer.
    pub refer: i64,
}

impl CommissionSplit {
    pub fn total(&self) -> i64 {
        self.user.saturating_add(self.refer)
    }
}

/// Parses a raw referrer-supplied override. Non-numeric or absent values
/// are silently ignored; the caller falls back to the event's base amounts.
pub fn parse_override(raw: Option<&str>) -> Option<i64> {
    raw?.trim().parse().ok()
}

/// Computes the final split for a conversion.
///
/// With no valid override, or when the event forbids splitting, the event's
/// base amounts are returned untouched. Otherwise the referrer's share is
/// clamped into `[min_refer_commission, max_refer_commission]` and the user
/// receives the remainder, so the combined total is invariant.
pub fn calculate(rule: &EventRule, override_share: Option<i64>) -> CommissionSplit {
    // Rule amounts arrive from an external boundary; saturate instead of
    // letting a hostile pair overflow.
    let total = rule.user_amount.saturating_add(rule.refer_amount);

    match override_share {
        Some(requested) if rule.is_commission_split_allowed => {
            let share = requested
                .max(rule.min_refer_commission)
                .min(rule.max_refer_commission);
            CommissionSplit {
                user: total.saturating_sub(share),
                refer: share,
            }
        }
        _ => CommissionSplit {
            user: rule.user_amount,
            refer: rule.refer_amount,
        },
    }
}

/// Per-conversion memo for the export, report and notification paths, which
/// all recompute the same split many times within one operation.
#[derive(Debug, Default)]
pub struct CommissionCache {
    splits: HashMap<Uuid, CommissionSplit>,
}

impl CommissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn split_for(
        &mut self,
        conversion_id: Uuid,
        rule: &EventRule,
        override_share: Option<i64>,
    ) -> CommissionSplit {
        *self
            .splits
            .entry(conversion_id)
            .or_insert_with(|| calculate(rule, override_share))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(user: i64, refer: i64, allowed: bool, min: i64, max: i64) -> EventRule {
        EventRule {
            user_amount: user,
            refer_amount: refer,
            is_commission_split_allowed: allowed,
            min_refer_commission: min,
            max_refer_commission: max,
            is_instant_pay_user: false,
            is_instant_pay_refer: false,
        }
    }

    #[test]
    fn total_is_invariant_for_any_override() {
        let r = rule(80, 20, true, 0, 100);
        for v in [-50, 0, 7, 20, 99, 100, 150, i64::MAX / 2] {
            let split = calculate(&r, Some(v));
            assert_eq!(split.total(), 100, "override {v}");
        }
        assert_eq!(calculate(&r, None).total(), 100);
    }

    #[test]
    fn override_is_clamped_into_bounds() {
        let r = rule(80, 20, true, 10, 60);
        assert_eq!(calculate(&r, Some(5)).refer, 10);
        assert_eq!(calculate(&r, Some(35)).refer, 35);
        assert_eq!(calculate(&r, Some(500)).refer, 60);
    }

    #[test]
    fn oversized_override_clamps_to_max_and_zeroes_user() {
        let r = rule(80, 20, true, 0, 100);
        let split = calculate(&r, Some(150));
        assert_eq!(split.refer, 100);
        assert_eq!(split.user, 0);
    }

    #[test]
    fn override_ignored_when_split_not_allowed() {
        let r = rule(80, 20, false, 0, 100);
        let split = calculate(&r, Some(90));
        assert_eq!(split.user, 80);
        assert_eq!(split.refer, 20);
    }

    #[test]
    fn absent_override_keeps_base_amounts() {
        let r = rule(70, 30, true, 0, 100);
        let split = calculate(&r, None);
        assert_eq!(split.user, 70);
        assert_eq!(split.refer, 30);
    }

    #[test]
    fn non_numeric_override_parses_to_none() {
        assert_eq!(parse_override(None), None);
        assert_eq!(parse_override(Some("")), None);
        assert_eq!(parse_override(Some("abc")), None);
        assert_eq!(parse_override(Some("12.5")), None);
        assert_eq!(parse_override(Some(" 42 ")), Some(42));
        assert_eq!(parse_override(Some("-3")), Some(-3));
    }

    #[test]
    fn extreme_rule_amounts_saturate_instead_of_panicking() {
        let r = rule(i64::MAX, 1, true, 0, 100);
        let split = calculate(&r, Some(50));
        assert_eq!(split.refer, 50);
        assert_eq!(split.user, i64::MAX - 50);

        let r = rule(i64::MAX, i64::MAX, false, 0, 0);
        let split = calculate(&r, None);
        assert_eq!(split.total(), i64::MAX);
    }

    #[test]
    fn negative_override_clamps_to_min() {
        let r = rule(80, 20, true, 10, 60);
        assert_eq!(calculate(&r, Some(-3)).refer, 10);
    }

    #[test]
    fn cache_returns_the_memoized_split() {
        let r = rule(80, 20, true, 0, 100);
        let id = Uuid::new_v4();
        let mut cache = CommissionCache::new();
        let first = cache.split_for(id, &r, Some(40));
        // A different override for the same conversion must not recompute.
        let second = cache.split_for(id, &r, Some(90));
        assert_eq!(first, second);
        assert_eq!(first.refer, 40);
    }
}
