//! Persistence for earnings and payouts.
//!
//! All settlement writes funnel through here. Claim and detach queries take
//! an open transaction so callers control the lock scope; the row lock must
//! cover exactly the earnings being claimed or detached and nothing longer.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::types::{Earning, EarningKind, Payout, PayoutStatus};

/// An earning about to be written by the ledger.
#[derive(Debug, Clone)]
pub struct NewEarning {
    pub conversion_id: Uuid,
    pub kind: EarningKind,
    pub amount: i64,
    pub upi: String,
}

pub async fn insert_earning(
    tx: &mut Transaction<'_, Postgres>,
    earning: &NewEarning,
) -> Result<Earning, sqlx::Error> {
    sqlx::query_as::<_, Earning>(
        r#"INSERT INTO earnings (id, conversion_id, kind, amount, upi)
           VALUES ($1, $2, $3, $4, $5)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(earning.conversion_id)
    .bind(earning.kind.as_str())
    .bind(earning.amount)
    .bind(&earning.upi)
    .fetch_one(tx.as_mut())
    .await
}

pub async fn earnings_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<Earning>, sqlx::Error> {
    sqlx::query_as::<_, Earning>(r#"SELECT * FROM earnings WHERE id = ANY($1)"#)
        .bind(ids)
        .fetch_all(pool)
        .await
}

pub async fn unpaid_earnings(pool: &PgPool) -> Result<Vec<Earning>, sqlx::Error> {
    sqlx::query_as::<_, Earning>(
        r#"SELECT * FROM earnings WHERE payout_id IS NULL ORDER BY created_at"#,
    )
    .fetch_all(pool)
    .await
}

/// Locks and returns the subset of `ids` that is still unclaimed. Rows a
/// concurrent batcher already claimed simply drop out of the result; this
/// is the exactly-once claim mechanism.
pub async fn lock_unclaimed_earnings(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> Result<Vec<Earning>, sqlx::Error> {
    sqlx::query_as::<_, Earning>(
        r#"SELECT * FROM earnings WHERE id = ANY($1) AND payout_id IS NULL FOR UPDATE"#,
    )
    .bind(ids)
    .fetch_all(tx.as_mut())
    .await
}

/// Locks the earnings currently attached to a payout (retry/void path).
pub async fn lock_earnings_of_payout(
    tx: &mut Transaction<'_, Postgres>,
    payout_id: Uuid,
) -> Result<Vec<Earning>, sqlx::Error> {
    sqlx::query_as::<_, Earning>(r#"SELECT * FROM earnings WHERE payout_id = $1 FOR UPDATE"#)
        .bind(payout_id)
        .fetch_all(tx.as_mut())
        .await
}

pub async fn claim_earnings(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
    payout_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(r#"UPDATE earnings SET payout_id = $2 WHERE id = ANY($1)"#)
        .bind(ids)
        .bind(payout_id)
        .execute(tx.as_mut())
        .await?;
    Ok(res.rows_affected())
}

pub async fn detach_earnings_of_payout(
    tx: &mut Transaction<'_, Postgres>,
    payout_id: Uuid,
) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(r#"UPDATE earnings SET payout_id = NULL WHERE payout_id = $1"#)
        .bind(payout_id)
        .execute(tx.as_mut())
        .await?;
    Ok(res.rows_affected())
}

/// Creation parameters for a payout row, always born PENDING.
#[derive(Debug, Clone)]
pub struct NewPayout {
    pub upi: String,
    pub total_amount: i64,
    pub payment_gateway: String,
    pub reference_id: String,
    pub comment: Option<String>,
}

pub async fn insert_payout(
    tx: &mut Transaction<'_, Postgres>,
    payout: &NewPayout,
) -> Result<Payout, sqlx::Error> {
    sqlx::query_as::<_, Payout>(
        r#"INSERT INTO payouts (id, upi, total_amount, payment_gateway, reference_id, status, comment)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(&payout.upi)
    .bind(payout.total_amount)
    .bind(&payout.payment_gateway)
    .bind(&payout.reference_id)
    .bind(PayoutStatus::Pending.as_str())
    .bind(&payout.comment)
    .fetch_one(tx.as_mut())
    .await
}

pub async fn payout_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Payout>, sqlx::Error> {
    sqlx::query_as::<_, Payout>(r#"SELECT * FROM payouts WHERE id = $1"#)
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Webhook correlation: a gateway may echo either our reference id or its
/// own payment id, so both columns are probed with one identifier.
pub async fn payout_by_correlation(
    pool: &PgPool,
    identifier: &str,
) -> Result<Option<Payout>, sqlx::Error> {
    sqlx::query_as::<_, Payout>(
        r#"SELECT * FROM payouts WHERE payment_id = $1 OR reference_id = $1"#,
    )
    .bind(identifier)
    .fetch_optional(pool)
    .await
}

/// Persists the full result of a gateway call. The write is guarded on the
/// payout still being PENDING: terminal states are sticky, and the executor
/// and webhook reconciliation may race. Returns whether a row changed.
pub async fn record_payout_result(
    pool: &PgPool,
    id: Uuid,
    status: PayoutStatus,
    payment_id: Option<&str>,
    api_response: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE payouts
           SET status = $2,
               payment_id = COALESCE($3, payment_id),
               api_response = $4,
               updated_at = NOW()
           WHERE id = $1 AND status = $5"#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(payment_id)
    .bind(api_response)
    .bind(PayoutStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Status-only write used by webhook reconciliation; keeps whatever
/// api_response the executor already stored. Same PENDING guard as
/// [`record_payout_result`].
pub async fn record_payout_status(
    pool: &PgPool,
    id: Uuid,
    status: PayoutStatus,
    payment_id: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let res = sqlx::query(
        r#"UPDATE payouts
           SET status = $2,
               payment_id = COALESCE($3, payment_id),
               updated_at = NOW()
           WHERE id = $1 AND status = $4"#,
    )
    .bind(id)
    .bind(status.as_str())
    .bind(payment_id)
    .bind(PayoutStatus::Pending.as_str())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Locks payout rows for the bulk void flow.
pub async fn lock_payouts_by_ids(
    tx: &mut Transaction<'_, Postgres>,
    ids: &[Uuid],
) -> Result<Vec<Payout>, sqlx::Error> {
    sqlx::query_as::<_, Payout>(r#"SELECT * FROM payouts WHERE id = ANY($1) FOR UPDATE"#)
        .bind(ids)
        .fetch_all(tx.as_mut())
        .await
}

pub async fn delete_payout(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(r#"DELETE FROM payouts WHERE id = $1"#)
        .bind(id)
        .execute(tx.as_mut())
        .await?;
    Ok(())
}

/// PENDING payouts older than the cutoff, for the reconciliation sweep.
pub async fn stale_pending_payouts(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Payout>, sqlx::Error> {
    sqlx::query_as::<_, Payout>(
        r#"SELECT * FROM payouts WHERE status = $1 AND updated_at < $2 ORDER BY updated_at"#,
    )
    .bind(PayoutStatus::Pending.as_str())
    .bind(cutoff)
    .fetch_all(pool)
    .await
}
