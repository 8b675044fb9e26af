//! The earning ledger: turns a validated conversion into unpaid ledger rows
//! and triggers instant payouts where the event (or an admin force-flag)
//! asks for them.

use sqlx::PgPool;
use uuid::Uuid;

use crate::commission::{self, parse_override};
use crate::error::SettlementError;
use crate::executor::PayoutQueue;
use crate::gateway::GatewayRegistry;
use crate::payout::initiate_payout_for_earnings;
use crate::store::{self, NewEarning};
use crate::types::{ConversionContext, Earning, EarningKind};

/// One earning the ledger intends to write, with its instant-pay decision.
#[derive(Debug, Clone)]
pub struct PlannedEarning {
    pub earning: NewEarning,
    pub instant: bool,
}

/// Computes the earnings a conversion produces, without touching storage.
///
/// Zero amounts never become rows; a REFER earning exists only when a
/// referrer is attached to the click; an explicit force-flag overrides the
/// event's instant-pay default.
pub fn plan_earnings(
    ctx: &ConversionContext,
    force_instant_user: Option<bool>,
    force_instant_refer: Option<bool>,
) -> Vec<PlannedEarning> {
    let split = commission::calculate(&ctx.rule, parse_override(ctx.commission_split.as_deref()));

    let mut plan = Vec::new();
    if split.user > 0 {
        plan.push(PlannedEarning {
            earning: NewEarning {
                conversion_id: ctx.conversion_id,
                kind: EarningKind::User,
                amount: split.user,
                upi: ctx.user_upi.clone(),
            },
            instant: force_instant_user.unwrap_or(ctx.rule.is_instant_pay_user),
        });
    }
    if let Some(referrer_upi) = &ctx.referrer_upi {
        if split.refer > 0 {
            plan.push(PlannedEarning {
                earning: NewEarning {
                    conversion_id: ctx.conversion_id,
                    kind: EarningKind::Refer,
                    amount: split.refer,
                    upi: referrer_upi.clone(),
                },
                instant: force_instant_refer.unwrap_or(ctx.rule.is_instant_pay_refer),
            });
        }
    }
    plan
}

/// Groups the instant-pay earnings by recipient, preserving plan order.
/// A payout is never merged across recipients, so one conversion can yield
/// zero, one or two groups.
pub fn instant_groups(plan: &[PlannedEarning], created: &[Earning]) -> Vec<Vec<Earning>> {
    let mut groups: Vec<(String, Vec<Earning>)> = Vec::new();
    for (planned, earning) in plan.iter().zip(created) {
        if !planned.instant {
            continue;
        }
        match groups.iter_mut().find(|(upi, _)| *upi == earning.upi) {
            Some((_, group)) => group.push(earning.clone()),
            None => groups.push((earning.upi.clone(), vec![earning.clone()])),
        }
    }
    groups.into_iter().map(|(_, group)| group).collect()
}

/// Creates the ledger rows for a validated conversion and batches every
/// instant-pay group into its own payout. Returns all created earnings,
/// reloaded so instant ones carry their payout id.
pub async fn process_earnings_for_conversion(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    queue: &PayoutQueue,
    ctx: &ConversionContext,
    force_instant_user: Option<bool>,
    force_instant_refer: Option<bool>,
) -> Result<Vec<Earning>, SettlementError> {
    let plan = plan_earnings(ctx, force_instant_user, force_instant_refer);
    if plan.is_empty() {
        return Ok(Vec::new());
    }

    let mut tx = pool.begin().await.map_err(SettlementError::Db)?;
    let mut created = Vec::with_capacity(plan.len());
    for planned in &plan {
        created.push(store::insert_earning(&mut tx, &planned.earning).await?);
    }
    tx.commit().await.map_err(SettlementError::Db)?;

    for group in instant_groups(&plan, &created) {
        initiate_payout_for_earnings(pool, gateways, queue, &group, None, None).await?;
    }

    let ids: Vec<Uuid> = created.iter().map(|e| e.id).collect();
    let earnings = store::earnings_by_ids(pool, &ids).await?;
    Ok(earnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventRule;
    use chrono::Utc;

    fn ctx(user: i64, refer: i64, referrer: Option<&str>) -> ConversionContext {
        ConversionContext {
            conversion_id: Uuid::new_v4(),
            rule: EventRule {
                user_amount: user,
                refer_amount: refer,
                is_commission_split_allowed: false,
                min_refer_commission: 0,
                max_refer_commission: user + refer,
                is_instant_pay_user: false,
                is_instant_pay_refer: false,
            },
            user_upi: "user@okaxis".to_string(),
            referrer_upi: referrer.map(str::to_string),
            commission_split: None,
        }
    }

    fn materialize(plan: &[PlannedEarning]) -> Vec<Earning> {
        plan.iter()
            .map(|p| Earning {
                id: Uuid::new_v4(),
                conversion_id: p.earning.conversion_id,
                payout_id: None,
                kind: p.earning.kind,
                amount: p.earning.amount,
                upi: p.earning.upi.clone(),
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn zero_amounts_never_become_earnings() {
        let plan = plan_earnings(&ctx(0, 20, Some("ref@ybl")), None, None);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].earning.kind, EarningKind::Refer);

        let plan = plan_earnings(&ctx(0, 0, Some("ref@ybl")), None, None);
        assert!(plan.is_empty());
    }

    #[test]
    fn refer_earning_requires_an_attached_referrer() {
        let plan = plan_earnings(&ctx(80, 20, None), None, None);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].earning.kind, EarningKind::User);
    }

    #[test]
    fn force_flag_overrides_event_default() {
        let mut c = ctx(80, 20, Some("ref@ybl"));
        c.rule.is_instant_pay_user = true;

        let plan = plan_earnings(&c, None, None);
        assert!(plan[0].instant);
        assert!(!plan[1].instant);

        let plan = plan_earnings(&c, Some(false), Some(true));
        assert!(!plan[0].instant);
        assert!(plan[1].instant);
    }

    #[test]
    fn instant_groups_are_per_recipient() {
        let mut c = ctx(80, 20, Some("ref@ybl"));
        c.rule.is_instant_pay_user = true;
        c.rule.is_instant_pay_refer = true;

        let plan = plan_earnings(&c, None, None);
        let created = materialize(&plan);
        let groups = instant_groups(&plan, &created);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].upi, "user@okaxis");
        assert_eq!(groups[1][0].upi, "ref@ybl");
    }

    #[test]
    fn same_recipient_earnings_share_one_group() {
        // Self-referral edge: user and referrer handles coincide.
        let mut c = ctx(80, 20, Some("user@okaxis"));
        c.rule.is_instant_pay_user = true;
        c.rule.is_instant_pay_refer = true;

        let plan = plan_earnings(&c, None, None);
        let created = materialize(&plan);
        let groups = instant_groups(&plan, &created);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[0].iter().map(|e| e.amount).sum::<i64>(), 100);
    }

    #[test]
    fn non_instant_plan_yields_no_groups() {
        let plan = plan_earnings(&ctx(80, 20, Some("ref@ybl")), None, None);
        let created = materialize(&plan);
        assert!(instant_groups(&plan, &created).is_empty());
    }
}
