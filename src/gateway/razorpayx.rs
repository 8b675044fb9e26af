//! RazorpayX payouts integration. Authenticates with HTTP basic auth and
//! speaks its own status vocabulary ("processed", "queued", "reversed"),
//! translated here before the shared fail-closed mapping applies.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{
    GatewayError, PaymentGateway, PaymentOutcome, PaymentRequest, WebhookData, beneficiary_name,
    json_or_raw, scalar_string,
};
use crate::config::RazorpayxConfig;
use crate::types::PayoutStatus;

pub(super) const NAME: &str = "razorpayx";

pub struct RazorpayxGateway {
    cfg: RazorpayxConfig,
    http: Client,
}

/// RazorpayX-specific status mapping, fail-closed like the shared one.
fn razorpay_status(raw: Option<&Value>) -> PayoutStatus {
    let Some(Value::String(s)) = raw else {
        return PayoutStatus::Failed;
    };
    match s.to_lowercase().as_str() {
        "processed" | "success" => PayoutStatus::Success,
        "queued" | "processing" | "pending" => PayoutStatus::Pending,
        _ => PayoutStatus::Failed,
    }
}

impl RazorpayxGateway {
    pub fn new(cfg: RazorpayxConfig, http: Client) -> Self {
        Self { cfg, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn outcome_from(ok: bool, body: Value) -> PaymentOutcome {
        let payment_id = scalar_string(body.get("id"));
        let status = if ok {
            razorpay_status(body.get("status"))
        } else {
            PayoutStatus::Failed
        };
        PaymentOutcome {
            status,
            payment_id,
            api_response: body,
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayxGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentOutcome, GatewayError> {
        let body = json!({
            "account_number": self.cfg.account_number,
            "amount": request.amount,
            "currency": "INR",
            "mode": "UPI",
            "purpose": "cashback",
            "reference_id": request.reference_id,
            "narration": request.comment.as_deref().unwrap_or("cashback payout"),
            "fund_account": {
                "account_type": "vpa",
                "vpa": { "address": request.upi },
                "contact": {
                    "name": beneficiary_name(&request.upi),
                    "type": "customer",
                },
            },
        });

        let resp = self
            .http
            .post(self.url("/v1/payouts"))
            .basic_auth(&self.cfg.key_id, Some(&self.cfg.key_secret))
            .json(&body)
            .send()
            .await?;

        let (ok, body) = json_or_raw(resp).await?;
        Ok(Self::outcome_from(ok, body))
    }

    async fn fetch_payment_status(
        &self,
        payment_id: Option<&str>,
        reference_id: &str,
    ) -> Result<PaymentOutcome, GatewayError> {
        let req = match payment_id {
            Some(id) => self.http.get(self.url(&format!("/v1/payouts/{id}"))),
            None => self
                .http
                .get(self.url("/v1/payouts"))
                .query(&[("reference_id", reference_id)]),
        };
        let resp = req
            .basic_auth(&self.cfg.key_id, Some(&self.cfg.key_secret))
            .send()
            .await?;

        let (ok, body) = json_or_raw(resp).await?;
        // Listing by reference id wraps the payout in an items array.
        let entity = body.pointer("/items/0").unwrap_or(&body).clone();
        let payment_id = scalar_string(entity.get("id"));
        let status = if ok {
            razorpay_status(entity.get("status"))
        } else {
            PayoutStatus::Failed
        };
        Ok(PaymentOutcome {
            status,
            payment_id,
            api_response: body,
        })
    }

    fn parse_webhook(&self, payload: &Value) -> WebhookData {
        let entity = payload.pointer("/payload/payout/entity");
        WebhookData {
            status: razorpay_status(entity.and_then(|e| e.get("status"))),
            payment_id: scalar_string(entity.and_then(|e| e.get("id"))),
            reference_id: scalar_string(entity.and_then(|e| e.get("reference_id"))),
        }
    }
}
