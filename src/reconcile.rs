//! Webhook reconciliation.
//!
//! Gateways deliver status callbacks asynchronously, possibly duplicated,
//! delayed, out of order with the synchronous response, or for payouts that
//! were never ours. None of that may bounce: the endpoint always answers
//! HTTP 200, and every problem short of a status write is a soft failure.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::responses::WebhookAck;
use crate::store;
use crate::types::AppState;

/// Whether a webhook-delivered status may still be applied. Terminal states
/// are sticky; PENDING accepts any write, including a redundant
/// PENDING→PENDING one.
pub fn reconcilable(current: crate::types::PayoutStatus) -> bool {
    !current.is_terminal()
}

/// Handles one `{gateway, raw payload}` webhook delivery.
pub async fn handle_status_webhook(
    state: &AppState,
    gateway_name: &str,
    payload: &Value,
) -> WebhookAck {
    let Some(gateway) = state.gateways.resolve(gateway_name) else {
        warn!(gateway = gateway_name, "webhook for unknown gateway");
        return WebhookAck::rejected("unknown gateway");
    };

    let parsed = gateway.parse_webhook(payload);
    let identifiers: Vec<&str> = parsed
        .payment_id
        .as_deref()
        .into_iter()
        .chain(parsed.reference_id.as_deref())
        .collect();
    if identifiers.is_empty() {
        warn!(gateway = gateway_name, "webhook carried no correlation identifier");
        return WebhookAck::rejected("no correlation identifier in payload");
    }

    let mut payout = None;
    for identifier in &identifiers {
        match store::payout_by_correlation(&state.pool, identifier).await {
            Ok(Some(found)) => {
                payout = Some(found);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                error!(error = %e, "payout lookup failed");
                return WebhookAck::rejected("storage failure");
            }
        }
    }
    // Test and duplicate webhooks for foreign payouts are expected traffic.
    let Some(payout) = payout else {
        warn!(
            gateway = gateway_name,
            identifiers = ?identifiers,
            "webhook does not match any payout"
        );
        return WebhookAck::rejected("payout not found");
    };

    if !reconcilable(payout.status) {
        info!(payout_id = %payout.id, status = %payout.status,
            "webhook replay for settled payout ignored");
        return WebhookAck::accepted("payout already settled");
    }

    let written = match store::record_payout_status(
        &state.pool,
        payout.id,
        parsed.status,
        parsed.payment_id.as_deref(),
    )
    .await
    {
        Ok(written) => written,
        Err(e) => {
            error!(payout_id = %payout.id, error = %e, "status write failed");
            return WebhookAck::rejected("storage failure");
        }
    };
    if !written {
        // Lost the race against the executor between our read and write.
        return WebhookAck::accepted("payout already settled");
    }

    match store::payout_by_id(&state.pool, payout.id).await {
        Ok(Some(fresh)) => state.notifier.payout_status_changed(&fresh).await,
        Ok(None) => {}
        Err(e) => error!(payout_id = %payout.id, error = %e, "reload after status write failed"),
    }

    WebhookAck::accepted("payout status updated")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PayoutStatus;

    #[test]
    fn terminal_statuses_are_sticky() {
        assert!(!reconcilable(PayoutStatus::Success));
        assert!(!reconcilable(PayoutStatus::Failed));
    }

    #[test]
    fn pending_accepts_any_write_including_pending() {
        // Redundant PENDING→PENDING deliveries are applied, not guarded.
        assert!(reconcilable(PayoutStatus::Pending));
    }
}
