use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::executor::PayoutQueue;
use crate::gateway::GatewayRegistry;
use crate::notify::NotificationSink;

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The database pool.
    pub pool: PgPool,
    /// The application configuration.
    pub config: Config,
    /// Registry of configured payment gateways.
    pub gateways: Arc<GatewayRegistry>,
    /// Queue feeding the asynchronous payout worker.
    pub queue: PayoutQueue,
    /// Funnel for payout status-changed notifications.
    pub notifier: Arc<dyn NotificationSink>,
}

impl AppState {
    /// The slice of state the payout worker and sweep operate on.
    pub fn executor_context(&self) -> crate::executor::ExecutorContext {
        crate::executor::ExecutorContext {
            pool: self.pool.clone(),
            gateways: self.gateways.clone(),
            notifier: self.notifier.clone(),
            stale_after: chrono::Duration::seconds(self.config.stale_after_secs),
        }
    }
}

/// Which party an earning is owed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EarningKind {
    /// The end-user who completed the conversion.
    User,
    /// The referrer attached to the originating click.
    Refer,
}

impl EarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EarningKind::User => "USER",
            EarningKind::Refer => "REFER",
        }
    }
}

impl FromStr for EarningKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(EarningKind::User),
            "REFER" => Ok(EarningKind::Refer),
            other => Err(format!("unknown earning kind: {other}")),
        }
    }
}

impl fmt::Display for EarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settlement status shared by payouts and normalized gateway responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PayoutStatus {
    Pending,
    Success,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "PENDING",
            PayoutStatus::Success => "SUCCESS",
            PayoutStatus::Failed => "FAILED",
        }
    }

    /// SUCCESS and FAILED are sticky: only the explicit retry flow may touch
    /// a payout once it reaches either.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PayoutStatus::Success | PayoutStatus::Failed)
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PayoutStatus::Pending),
            "SUCCESS" => Ok(PayoutStatus::Success),
            "FAILED" => Ok(PayoutStatus::Failed),
            other => Err(format!("unknown payout status: {other}")),
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An individual ledger entry owed to the user or their referrer for one
/// conversion. `payout_id = NULL` means unpaid and unclaimed.
#[derive(Debug, Clone, Serialize)]
pub struct Earning {
    /// The ID of the earning.
    pub id: Uuid,
    /// The conversion this earning was computed from.
    pub conversion_id: Uuid,
    /// The payout that claimed this earning, if any.
    pub payout_id: Option<Uuid>,
    /// Whether the earning belongs to the user or the referrer.
    pub kind: EarningKind,
    /// The amount owed, always positive.
    pub amount: i64,
    /// The recipient identifier (UPI handle) the amount is owed to.
    pub upi: String,
    /// The timestamp when the earning was created.
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Earning {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Earning {
            id: row.try_get("id")?,
            conversion_id: row.try_get("conversion_id")?,
            payout_id: row.try_get("payout_id")?,
            kind: kind
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            amount: row.try_get("amount")?,
            upi: row.try_get("upi")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A batch of earnings disbursed together to one recipient through one
/// gateway transaction.
#[derive(Debug, Clone, Serialize)]
pub struct Payout {
    /// The ID of the payout.
    pub id: Uuid,
    /// The recipient identifier the batch is owed to.
    pub upi: String,
    /// Sum of the claimed earnings' amounts.
    pub total_amount: i64,
    /// Name of the gateway selected when the payout was created.
    pub payment_gateway: String,
    /// Gateway-assigned transaction identifier, once known.
    pub payment_id: Option<String>,
    /// Platform-assigned unique correlation token.
    pub reference_id: String,
    /// Current settlement status.
    pub status: PayoutStatus,
    /// Free-text comment from the operator who created the batch.
    pub comment: Option<String>,
    /// Raw gateway payload kept for diagnostics.
    pub api_response: Option<serde_json::Value>,
    /// The timestamp when the payout was created.
    pub created_at: DateTime<Utc>,
    /// The timestamp of the last status write.
    pub updated_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Payout {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Payout {
            id: row.try_get("id")?,
            upi: row.try_get("upi")?,
            total_amount: row.try_get("total_amount")?,
            payment_gateway: row.try_get("payment_gateway")?,
            payment_id: row.try_get("payment_id")?,
            reference_id: row.try_get("reference_id")?,
            status: status
                .parse()
                .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
            comment: row.try_get("comment")?,
            api_response: row.try_get("api_response")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// The per-event commission rule read from campaign configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventRule {
    /// Base commission owed to the user.
    pub user_amount: i64,
    /// Base commission owed to the referrer.
    pub refer_amount: i64,
    /// Whether the referrer may override the split.
    pub is_commission_split_allowed: bool,
    /// Lower clamp for an overridden referrer share.
    pub min_refer_commission: i64,
    /// Upper clamp for an overridden referrer share.
    pub max_refer_commission: i64,
    /// Whether user earnings pay out immediately by default.
    pub is_instant_pay_user: bool,
    /// Whether referrer earnings pay out immediately by default.
    pub is_instant_pay_refer: bool,
}

/// Everything the ledger needs about a validated conversion. Assembled by
/// the conversion-ingestion collaborator; the settlement core never reads
/// click or campaign tables itself.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionContext {
    /// The ID of the validated conversion.
    pub conversion_id: Uuid,
    /// The commission rule of the conversion's event.
    pub rule: EventRule,
    /// The user's recipient identifier.
    pub user_upi: String,
    /// The referrer's recipient identifier, if a referrer is attached.
    pub referrer_upi: Option<String>,
    /// Raw referrer-supplied split override, if any.
    pub commission_split: Option<String>,
}
