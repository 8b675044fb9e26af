use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_RECIPIENT, E_BATCH_FAILURE, E_DB_FAILURE, E_GATEWAY_CONFIG,
    E_LEDGER_FAILURE, E_PAYOUT_NOT_FOUND, E_RETRY_FAILURE, SettlementError,
};
use crate::executor::reconcile_stale_payouts;
use crate::ledger::process_earnings_for_conversion;
use crate::payout::{initiate_payout_for_earnings, mark_failed_payouts_unpaid, retry_failed_payout};
use crate::reconcile::handle_status_webhook;
use crate::responses::{ApiOk, RequestMeta, WebhookAck, meta_middleware};
use crate::store;
use crate::types::{AppState, ConversionContext, Earning, Payout};

/// The request boundary for the conversion-ingestion collaborator.
#[derive(Deserialize)]
pub struct ProcessEarningsRequest {
    /// The validated conversion and its commission context.
    #[serde(flatten)]
    pub context: ConversionContext,
    /// Admin override for the user earning's instant-pay flag.
    pub force_instant_pay_user: Option<bool>,
    /// Admin override for the referrer earning's instant-pay flag.
    pub force_instant_pay_refer: Option<bool>,
}

/// The request to batch arbitrary unpaid earnings into one payout.
#[derive(Deserialize)]
pub struct BatchPayoutRequest {
    /// The earnings to claim.
    pub earning_ids: Vec<Uuid>,
    /// Free-text operator comment.
    pub comment: Option<String>,
    /// Recipient override; required when the earnings span recipients.
    pub override_upi: Option<String>,
}

/// The request to retry a failed payout under a corrected recipient.
#[derive(Deserialize)]
pub struct RetryPayoutRequest {
    /// The corrected recipient identifier.
    pub upi: String,
    /// Free-text operator comment.
    pub comment: Option<String>,
}

/// The request to void failed payouts and release their earnings.
#[derive(Deserialize)]
pub struct MarkUnpaidRequest {
    /// The failed payouts to delete.
    pub payout_ids: Vec<Uuid>,
}

/// The response after voiding failed payouts.
#[derive(Serialize)]
pub struct MarkUnpaidResponse {
    /// How many payouts were deleted.
    pub deleted: u64,
}

/// The response after a reconciliation sweep.
#[derive(Serialize)]
pub struct SweepResponse {
    /// How many stale payouts were checked against their gateway.
    pub checked: u64,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/webhook/payment-status/{gateway}",
            post(webhook_handler).get(webhook_handler),
        )
        .route("/earnings/process", post(process_earnings_handler))
        .route("/earnings/unpaid", get(unpaid_earnings_handler))
        .route("/payouts/batch", post(batch_payout_handler))
        .route("/payouts/mark-unpaid", post(mark_unpaid_handler))
        .route("/payouts/sweep", post(sweep_handler))
        .route("/payouts/{id}", get(get_payout_handler))
        .route("/payouts/{id}/retry", post(retry_payout_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

fn code_for(e: &SettlementError) -> &'static str {
    match e {
        SettlementError::Validation(_) => E_BAD_RECIPIENT,
        SettlementError::Config(_) => E_GATEWAY_CONFIG,
        SettlementError::Db(_) => E_DB_FAILURE,
        SettlementError::Logic(_) | SettlementError::NothingToClaim(_) => E_BATCH_FAILURE,
    }
}

fn settlement_error(e: SettlementError, meta: RequestMeta, fallback: &str) -> ApiErrorWithMeta {
    let code = match &e {
        SettlementError::Logic(_) | SettlementError::NothingToClaim(_) => fallback,
        other => code_for(other),
    };
    ApiError::from(e).with_meta(meta).with_code(code)
}

/// Gateways must never be given a retryable status for expected hiccups,
/// so every delivery is answered 200 with a boolean body. The body is read
/// raw: a malformed payload is a soft failure, not an extractor rejection.
async fn webhook_handler(
    State(st): State<AppState>,
    Path(gateway): Path<String>,
    body: Bytes,
) -> Json<WebhookAck> {
    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return Json(WebhookAck::rejected("unreadable payload"));
    };
    Json(handle_status_webhook(&st, &gateway, &payload).await)
}

async fn process_earnings_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ProcessEarningsRequest>,
) -> Result<ApiOk<Vec<Earning>>, ApiErrorWithMeta> {
    let earnings = process_earnings_for_conversion(
        &st.pool,
        &st.gateways,
        &st.queue,
        &req.context,
        req.force_instant_pay_user,
        req.force_instant_pay_refer,
    )
    .await
    .map_err(|e| settlement_error(e, meta.clone(), E_LEDGER_FAILURE))?;

    Ok(ApiOk::created("earnings processed", earnings, meta))
}

async fn unpaid_earnings_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Earning>>, ApiErrorWithMeta> {
    let earnings = store::unpaid_earnings(&st.pool).await.map_err(|e| {
        ApiError::Internal(e.into())
            .with_meta(meta.clone())
            .with_code(E_DB_FAILURE)
    })?;

    Ok(ApiOk::ok("unpaid earnings fetched", earnings, meta))
}

/// Repeated ids in a request are harmless; collapse them so the
/// unknown-ids check below compares against what can actually exist.
fn dedup_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}

async fn batch_payout_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<BatchPayoutRequest>,
) -> Result<ApiOk<Payout>, ApiErrorWithMeta> {
    let earning_ids = dedup_ids(&req.earning_ids);
    let earnings = store::earnings_by_ids(&st.pool, &earning_ids)
        .await
        .map_err(|e| {
            ApiError::Internal(e.into())
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?;
    if earnings.len() != earning_ids.len() {
        return Err(ApiError::BadRequest("unknown earning ids in request".into())
            .with_meta(meta)
            .with_code(E_BATCH_FAILURE));
    }

    let payout = initiate_payout_for_earnings(
        &st.pool,
        &st.gateways,
        &st.queue,
        &earnings,
        req.comment,
        req.override_upi,
    )
    .await
    .map_err(|e| settlement_error(e, meta.clone(), E_BATCH_FAILURE))?;

    Ok(ApiOk::created("payout created", payout, meta))
}

async fn get_payout_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Payout>, ApiErrorWithMeta> {
    let payout = store::payout_by_id(&st.pool, id)
        .await
        .map_err(|e| {
            ApiError::Internal(e.into())
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?
        .ok_or_else(|| {
            ApiError::NotFound("payout not found".into())
                .with_meta(meta.clone())
                .with_code(E_PAYOUT_NOT_FOUND)
        })?;

    Ok(ApiOk::ok("payout fetched", payout, meta))
}

async fn retry_payout_handler(
    State(st): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<RetryPayoutRequest>,
) -> Result<ApiOk<Payout>, ApiErrorWithMeta> {
    let failed = store::payout_by_id(&st.pool, id)
        .await
        .map_err(|e| {
            ApiError::Internal(e.into())
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?
        .ok_or_else(|| {
            ApiError::NotFound("payout not found".into())
                .with_meta(meta.clone())
                .with_code(E_PAYOUT_NOT_FOUND)
        })?;

    let payout = retry_failed_payout(
        &st.pool,
        &st.gateways,
        &st.queue,
        &failed,
        &req.upi,
        req.comment,
    )
    .await
    .map_err(|e| settlement_error(e, meta.clone(), E_RETRY_FAILURE))?;

    Ok(ApiOk::created("payout retried", payout, meta))
}

async fn mark_unpaid_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<MarkUnpaidRequest>,
) -> Result<ApiOk<MarkUnpaidResponse>, ApiErrorWithMeta> {
    let deleted = mark_failed_payouts_unpaid(&st.pool, &req.payout_ids)
        .await
        .map_err(|e| settlement_error(e, meta.clone(), E_RETRY_FAILURE))?;

    Ok(ApiOk::ok(
        "failed payouts voided",
        MarkUnpaidResponse { deleted },
        meta,
    ))
}

async fn sweep_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<SweepResponse>, ApiErrorWithMeta> {
    let checked = reconcile_stale_payouts(&st.executor_context())
        .await
        .map_err(|e| {
            ApiError::Internal(e.into())
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?;

    Ok(ApiOk::ok("sweep finished", SweepResponse { checked }, meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CashfreeConfig, Config};
    use crate::executor::{ExecutorContext, spawn_worker};
    use crate::gateway::GatewayRegistry;
    use crate::notify::{LogNotifier, NotificationSink};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::json;
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            server_port: 8000,
            database_url: "postgres://localhost/unused".to_string(),
            active_gateway: "cashfree".to_string(),
            http_timeout_secs: 5,
            stale_after_secs: 900,
            sweep_interval_secs: 300,
            notify_webhook_url: None,
            cashfree: Some(CashfreeConfig {
                client_id: "cf-id".to_string(),
                client_secret: "cf-secret".to_string(),
                base_url: "https://payout-api.cashfree.com".to_string(),
            }),
            razorpayx: None,
            paysprint: None,
            upigateway: None,
        }
    }

    /// Router wired to a lazy pool: nothing here may touch the database.
    fn test_router() -> Router {
        let config = test_config();
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .unwrap();
        let gateways = Arc::new(GatewayRegistry::from_config(&config).unwrap());
        let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);
        let ctx = ExecutorContext {
            pool: pool.clone(),
            gateways: gateways.clone(),
            notifier: notifier.clone(),
            stale_after: chrono::Duration::seconds(config.stale_after_secs),
        };
        let (queue, _worker) = spawn_worker(ctx);
        init_router(AppState {
            pool,
            config,
            gateways,
            queue,
            notifier,
        })
    }

    async fn ack_body(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn malformed_webhook_body_is_a_200_soft_failure() {
        let resp = test_router()
            .oneshot(
                Request::post("/webhook/payment-status/cashfree")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not valid json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let ack = ack_body(resp).await;
        assert_eq!(ack["status"], json!(false));
    }

    #[tokio::test]
    async fn empty_webhook_body_is_a_200_soft_failure() {
        let resp = test_router()
            .oneshot(
                Request::get("/webhook/payment-status/cashfree")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let ack = ack_body(resp).await;
        assert_eq!(ack["status"], json!(false));
    }

    #[tokio::test]
    async fn unknown_gateway_webhook_is_a_200_soft_failure() {
        let resp = test_router()
            .oneshot(
                Request::post("/webhook/payment-status/not-a-gateway")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({ "status": "success" }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let ack = ack_body(resp).await;
        assert_eq!(ack["status"], json!(false));
    }

    #[test]
    fn duplicate_earning_ids_collapse_to_one() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let deduped = dedup_ids(&[a, b, a, a, b]);
        assert_eq!(deduped.len(), 2);
        assert!(deduped.contains(&a));
        assert!(deduped.contains(&b));
    }
}
