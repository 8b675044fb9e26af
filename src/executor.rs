//! Asynchronous payout execution and the periodic status sweep.
//!
//! The worker drains a queue of payout ids and drives each through its
//! gateway exactly once. Jobs always complete: every outcome, including a
//! transport failure, ends as a persisted terminal or pending status plus
//! one status-changed notification. The gateway call runs with no database
//! lock held.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{GatewayRegistry, PaymentGateway, PaymentOutcome, PaymentRequest};
use crate::notify::NotificationSink;
use crate::store;
use crate::types::{Payout, PayoutStatus};

/// Handle for enqueueing payouts onto the worker.
#[derive(Clone)]
pub struct PayoutQueue {
    tx: mpsc::UnboundedSender<Uuid>,
}

impl PayoutQueue {
    pub fn enqueue(&self, payout_id: Uuid) {
        if self.tx.send(payout_id).is_err() {
            error!(%payout_id, "payout worker is gone, payout left PENDING for the sweep");
        }
    }
}

/// Everything the worker and sweep need, independent of the HTTP surface.
#[derive(Clone)]
pub struct ExecutorContext {
    pub pool: PgPool,
    pub gateways: Arc<GatewayRegistry>,
    pub notifier: Arc<dyn NotificationSink>,
    /// Age after which a PENDING payout is swept.
    pub stale_after: ChronoDuration,
}

/// Spawns the payout worker and returns its queue handle.
pub fn spawn_worker(ctx: ExecutorContext) -> (PayoutQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(payout_id) = rx.recv().await {
            execute_payment(&ctx, payout_id).await;
        }
    });
    (PayoutQueue { tx }, handle)
}

/// Spawns the periodic reconciliation sweep.
pub fn spawn_sweeper(ctx: ExecutorContext, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconcile_stale_payouts(&ctx).await {
                Ok(0) => {}
                Ok(n) => info!(checked = n, "reconciliation sweep finished"),
                Err(e) => error!(error = %e, "reconciliation sweep failed"),
            }
        }
    })
}

/// Calls the gateway and folds transport errors into a FAILED outcome, so
/// the job itself can never be failed by the network.
pub(crate) async fn attempt_payment(
    gateway: &dyn PaymentGateway,
    request: &PaymentRequest,
) -> PaymentOutcome {
    match gateway.process_payment(request).await {
        Ok(outcome) => outcome,
        Err(e) => PaymentOutcome {
            status: PayoutStatus::Failed,
            payment_id: None,
            api_response: json!({ "error": e.to_string() }),
        },
    }
}

/// Executes one queued payout. Never returns an error and never panics;
/// whatever happens, the payout leaves PENDING only through a recorded
/// outcome, and exactly one notification fires per status write.
pub async fn execute_payment(ctx: &ExecutorContext, payout_id: Uuid) {
    let payout = match store::payout_by_id(&ctx.pool, payout_id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            warn!(%payout_id, "queued payout no longer exists");
            return;
        }
        Err(e) => {
            error!(%payout_id, error = %e, "failed to load queued payout");
            return;
        }
    };

    // The queue is at-least-once; a redelivered or webhook-settled payout
    // must not be paid twice.
    if payout.status != PayoutStatus::Pending {
        info!(%payout_id, status = %payout.status, "skipping non-pending payout");
        return;
    }

    // The gateway recorded on the payout may have been removed from the
    // configuration since batching; fall back to the active one.
    let gateway = match ctx
        .gateways
        .resolve(&payout.payment_gateway)
        .map(Ok)
        .unwrap_or_else(|| ctx.gateways.resolve_active())
    {
        Ok(g) => g,
        Err(e) => {
            let outcome = PaymentOutcome {
                status: PayoutStatus::Failed,
                payment_id: None,
                api_response: json!({ "error": e.to_string() }),
            };
            if let Err(e) = apply_outcome(ctx, &payout, &outcome).await {
                error!(%payout_id, error = %e, "failed to record gateway resolution failure");
            }
            return;
        }
    };

    let request = PaymentRequest {
        upi: payout.upi.clone(),
        amount: payout.total_amount,
        reference_id: payout.reference_id.clone(),
        comment: payout.comment.clone(),
    };

    let outcome = attempt_payment(gateway.as_ref(), &request).await;
    if let Err(e) = apply_outcome(ctx, &payout, &outcome).await {
        error!(%payout_id, error = %e, "failed to record gateway outcome");
    }
}

/// Shared status-write path for the executor and the sweep: persist the
/// outcome, reload, notify once. The write is conditional on the payout
/// still being PENDING, so a race with webhook reconciliation leaves the
/// first writer's terminal result untouched and fires no second
/// notification.
async fn apply_outcome(
    ctx: &ExecutorContext,
    payout: &Payout,
    outcome: &PaymentOutcome,
) -> Result<(), sqlx::Error> {
    let written = store::record_payout_result(
        &ctx.pool,
        payout.id,
        outcome.status,
        outcome.payment_id.as_deref(),
        &outcome.api_response,
    )
    .await?;
    if !written {
        info!(payout_id = %payout.id, "payout already settled, outcome discarded");
        return Ok(());
    }

    if let Some(fresh) = store::payout_by_id(&ctx.pool, payout.id).await? {
        ctx.notifier.payout_status_changed(&fresh).await;
    }
    Ok(())
}

/// Polls the gateway for every payout still PENDING beyond the staleness
/// window and applies the usual status-write path. A failed poll is not a
/// failed payment: transport errors here leave the payout PENDING.
pub async fn reconcile_stale_payouts(ctx: &ExecutorContext) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - ctx.stale_after;
    let stale = store::stale_pending_payouts(&ctx.pool, cutoff).await?;

    let mut checked = 0;
    for payout in stale {
        let Some(gateway) = ctx
            .gateways
            .resolve(&payout.payment_gateway)
            .or_else(|| ctx.gateways.resolve_active().ok())
        else {
            warn!(payout_id = %payout.id, gateway = %payout.payment_gateway,
                "no resolvable gateway for stale payout");
            continue;
        };

        match gateway
            .fetch_payment_status(payout.payment_id.as_deref(), &payout.reference_id)
            .await
        {
            Ok(outcome) => {
                apply_outcome(ctx, &payout, &outcome).await?;
                checked += 1;
            }
            Err(e) => {
                warn!(payout_id = %payout.id, error = %e, "status poll failed, will retry next sweep");
            }
        }
    }
    Ok(checked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, WebhookData};
    use async_trait::async_trait;
    use serde_json::Value;

    struct StubGateway {
        outcome: PayoutStatus,
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn process_payment(
            &self,
            _request: &PaymentRequest,
        ) -> Result<PaymentOutcome, GatewayError> {
            Ok(PaymentOutcome {
                status: self.outcome,
                payment_id: Some("stub-txn-1".to_string()),
                api_response: json!({ "status": "stubbed" }),
            })
        }

        async fn fetch_payment_status(
            &self,
            _payment_id: Option<&str>,
            _reference_id: &str,
        ) -> Result<PaymentOutcome, GatewayError> {
            Ok(PaymentOutcome {
                status: self.outcome,
                payment_id: None,
                api_response: Value::Null,
            })
        }

        fn parse_webhook(&self, _payload: &Value) -> WebhookData {
            WebhookData {
                status: PayoutStatus::Failed,
                payment_id: None,
                reference_id: None,
            }
        }
    }

    struct BrokenGateway;

    #[async_trait]
    impl PaymentGateway for BrokenGateway {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn process_payment(
            &self,
            _request: &PaymentRequest,
        ) -> Result<PaymentOutcome, GatewayError> {
            // A URL with no host makes reqwest fail at request build time,
            // producing a real transport error without touching the network.
            let err = reqwest::Client::new()
                .get("http://")
                .send()
                .await
                .unwrap_err();
            Err(GatewayError::Transport(err))
        }

        async fn fetch_payment_status(
            &self,
            _payment_id: Option<&str>,
            _reference_id: &str,
        ) -> Result<PaymentOutcome, GatewayError> {
            unreachable!()
        }

        fn parse_webhook(&self, _payload: &Value) -> WebhookData {
            unreachable!()
        }
    }

    fn request() -> PaymentRequest {
        PaymentRequest {
            upi: "ravi@okaxis".to_string(),
            amount: 75,
            reference_id: "CB-test".to_string(),
            comment: None,
        }
    }

    #[tokio::test]
    async fn successful_gateway_call_passes_through() {
        let gateway = StubGateway {
            outcome: PayoutStatus::Success,
        };
        let outcome = attempt_payment(&gateway, &request()).await;
        assert_eq!(outcome.status, PayoutStatus::Success);
        assert_eq!(outcome.payment_id.as_deref(), Some("stub-txn-1"));
    }

    #[tokio::test]
    async fn business_failure_is_an_outcome_not_an_error() {
        let gateway = StubGateway {
            outcome: PayoutStatus::Failed,
        };
        let outcome = attempt_payment(&gateway, &request()).await;
        assert_eq!(outcome.status, PayoutStatus::Failed);
    }

    #[tokio::test]
    async fn transport_error_becomes_failed_with_diagnostic() {
        let outcome = attempt_payment(&BrokenGateway, &request()).await;
        assert_eq!(outcome.status, PayoutStatus::Failed);
        assert_eq!(outcome.payment_id, None);
        let message = outcome.api_response["error"].as_str().unwrap();
        assert!(!message.is_empty());
    }
}
