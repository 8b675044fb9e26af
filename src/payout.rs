//! Payout batching, retry and void flows.
//!
//! Claiming an earning into a payout is the one place double-payment can
//! happen, so every claim and detach runs inside a single transaction with
//! `FOR UPDATE` row locks on exactly the earnings involved. The outbound
//! gateway call never happens under these locks; it belongs to the
//! asynchronous executor.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::SettlementError;
use crate::executor::PayoutQueue;
use crate::gateway::GatewayRegistry;
use crate::store::{self, NewPayout};
use crate::types::{Earning, Payout, PayoutStatus};

/// Generates the platform correlation token carried on a payout.
pub fn new_reference_id() -> String {
    format!("CB-{}", Uuid::new_v4().simple())
}

/// Checks a recipient identifier against the UPI handle format:
/// `local@provider`, local part limited to `[A-Za-z0-9._-]`, provider part
/// alphanumeric.
pub fn validate_upi(upi: &str) -> Result<(), SettlementError> {
    let invalid = || SettlementError::Validation(format!("invalid UPI handle: {upi}"));

    let (local, provider) = upi.split_once('@').ok_or_else(invalid)?;
    if local.is_empty() || provider.is_empty() || provider.contains('@') {
        return Err(invalid());
    }
    let local_ok = local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    let provider_ok = provider.chars().all(|c| c.is_ascii_alphanumeric());
    if local_ok && provider_ok {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Determines the recipient for a batch. All earnings must be owed to one
/// recipient unless an explicit override is supplied; anything else would
/// silently misroute funds and is a fatal logic error.
pub fn recipient_for_batch(
    earnings: &[Earning],
    override_recipient: Option<&str>,
) -> Result<String, SettlementError> {
    let first = earnings.first().ok_or_else(|| {
        SettlementError::Logic("cannot create a payout from an empty earnings set".to_string())
    })?;

    if let Some(upi) = override_recipient {
        return Ok(upi.to_string());
    }

    if earnings.iter().any(|e| e.upi != first.upi) {
        return Err(SettlementError::Logic(
            "earnings belong to different recipients and no override recipient was given"
                .to_string(),
        ));
    }
    Ok(first.upi.clone())
}

/// Claims still-unclaimed earnings into a new PENDING payout inside the
/// caller's transaction. Earnings a concurrent batcher already claimed drop
/// out; zero claimable rows aborts with no payout created.
async fn claim_into_payout(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
    upi: String,
    comment: Option<String>,
    gateway_name: String,
) -> Result<Payout, SettlementError> {
    let claimable = store::lock_unclaimed_earnings(tx, ids).await?;
    if claimable.is_empty() {
        return Err(SettlementError::NothingToClaim(
            "all requested earnings are already claimed by another payout".to_string(),
        ));
    }

    let total: i64 = claimable.iter().map(|e| e.amount).sum();
    let payout = store::insert_payout(
        tx,
        &NewPayout {
            upi,
            total_amount: total,
            payment_gateway: gateway_name,
            reference_id: new_reference_id(),
            comment,
        },
    )
    .await?;

    let claim_ids: Vec<Uuid> = claimable.iter().map(|e| e.id).collect();
    store::claim_earnings(tx, &claim_ids, payout.id).await?;
    Ok(payout)
}

/// Groups the given earnings into one payout for one recipient and enqueues
/// its asynchronous execution.
pub async fn initiate_payout_for_earnings(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    queue: &PayoutQueue,
    earnings: &[Earning],
    comment: Option<String>,
    override_recipient: Option<String>,
) -> Result<Payout, SettlementError> {
    let upi = recipient_for_batch(earnings, override_recipient.as_deref())?;
    let ids: Vec<Uuid> = earnings.iter().map(|e| e.id).collect();

    let mut tx = pool.begin().await.map_err(SettlementError::Db)?;
    let payout = claim_into_payout(
        &mut tx,
        &ids,
        upi,
        comment,
        gateways.active_name().to_string(),
    )
    .await?;
    tx.commit().await.map_err(SettlementError::Db)?;

    queue.enqueue(payout.id);
    Ok(payout)
}

/// Detaches the earnings of a FAILED payout and re-batches them under a
/// corrected recipient. The failed payout row stays behind as an audit
/// trail, FAILED with zero attached earnings.
pub async fn retry_failed_payout(
    pool: &PgPool,
    gateways: &GatewayRegistry,
    queue: &PayoutQueue,
    failed_payout: &Payout,
    corrected_upi: &str,
    comment: Option<String>,
) -> Result<Payout, SettlementError> {
    if failed_payout.status != PayoutStatus::Failed {
        return Err(SettlementError::Logic(format!(
            "payout {} is {}, only FAILED payouts may be retried",
            failed_payout.id, failed_payout.status
        )));
    }
    validate_upi(corrected_upi)?;

    let mut tx = pool.begin().await.map_err(SettlementError::Db)?;

    let attached = store::lock_earnings_of_payout(&mut tx, failed_payout.id).await?;
    if attached.is_empty() {
        return Err(SettlementError::Logic(format!(
            "payout {} has no attached earnings to retry",
            failed_payout.id
        )));
    }
    store::detach_earnings_of_payout(&mut tx, failed_payout.id).await?;

    let ids: Vec<Uuid> = attached.iter().map(|e| e.id).collect();
    let payout = claim_into_payout(
        &mut tx,
        &ids,
        corrected_upi.to_string(),
        comment,
        gateways.active_name().to_string(),
    )
    .await?;
    tx.commit().await.map_err(SettlementError::Db)?;

    queue.enqueue(payout.id);
    Ok(payout)
}

/// Bulk recovery for failed batches: detaches all earnings of the selected
/// FAILED payouts and deletes the payout rows outright. Irreversible; the
/// earnings become re-batchable from scratch and no retry is enqueued.
pub async fn mark_failed_payouts_unpaid(
    pool: &PgPool,
    payout_ids: &[Uuid],
) -> Result<u64, SettlementError> {
    if payout_ids.is_empty() {
        return Err(SettlementError::Validation(
            "no payouts selected".to_string(),
        ));
    }

    let mut tx = pool.begin().await.map_err(SettlementError::Db)?;
    let payouts = store::lock_payouts_by_ids(&mut tx, payout_ids).await?;

    for payout in &payouts {
        if payout.status != PayoutStatus::Failed {
            return Err(SettlementError::Logic(format!(
                "payout {} is {}, only FAILED payouts may be voided",
                payout.id, payout.status
            )));
        }
    }

    let mut deleted = 0;
    for payout in &payouts {
        store::detach_earnings_of_payout(&mut tx, payout.id).await?;
        store::delete_payout(&mut tx, payout.id).await?;
        deleted += 1;
    }
    tx.commit().await.map_err(SettlementError::Db)?;
    Ok(deleted)
}
