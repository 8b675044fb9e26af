//! PaySprint payout integration. Bearer-token auth; transaction status is
//! reported as `txn_status` at the top level of both responses and webhooks.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{
    GatewayError, PaymentGateway, PaymentOutcome, PaymentRequest, WebhookData, beneficiary_name,
    json_or_raw, normalize_status, scalar_string,
};
use crate::config::PaysprintConfig;
use crate::types::PayoutStatus;

pub(super) const NAME: &str = "paysprint";

pub struct PaysprintGateway {
    cfg: PaysprintConfig,
    http: Client,
}

impl PaysprintGateway {
    pub fn new(cfg: PaysprintConfig, http: Client) -> Self {
        Self { cfg, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn outcome_from(ok: bool, body: Value) -> PaymentOutcome {
        let payment_id = scalar_string(body.get("refno"));
        let status = if ok {
            normalize_status(body.get("txn_status"))
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
impl PaymentGateway for PaysprintGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentOutcome, GatewayError> {
        let body = json!({
            "bene_upi": request.upi,
            "bene_name": beneficiary_name(&request.upi),
            "amount": request.amount,
            "refid": request.reference_id,
            "mode": "UPI",
            "remarks": request.comment.as_deref().unwrap_or("cashback payout"),
        });

        let resp = self
            .http
            .post(self.url("/api/v1/payout/transfer"))
            .bearer_auth(&self.cfg.token)
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
        let body = match payment_id {
            Some(id) => json!({ "refno": id }),
            None => json!({ "refid": reference_id }),
        };
        let resp = self
            .http
            .post(self.url("/api/v1/payout/status"))
            .bearer_auth(&self.cfg.token)
            .json(&body)
            .send()
            .await?;

        let (ok, body) = json_or_raw(resp).await?;
        Ok(Self::outcome_from(ok, body))
    }

    fn parse_webhook(&self, payload: &Value) -> WebhookData {
        WebhookData {
            status: normalize_status(payload.get("txn_status")),
            payment_id: scalar_string(payload.get("refno")),
            reference_id: scalar_string(payload.get("refid")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> PaysprintGateway {
        PaysprintGateway::new(
            PaysprintConfig {
                token: "jwt-token".to_string(),
                base_url: "https://api.paysprint.in".to_string(),
            },
            Client::new(),
        )
    }

    #[test]
    fn webhook_reads_flat_fields() {
        let payload = json!({
            "txn_status": "SUCCESS",
            "refno": 555001,
            "refid": "ref-77",
        });
        let parsed = gateway().parse_webhook(&payload);
        assert_eq!(parsed.status, PayoutStatus::Success);
        assert_eq!(parsed.payment_id.as_deref(), Some("555001"));
        assert_eq!(parsed.reference_id.as_deref(), Some("ref-77"));
    }

    #[test]
    fn missing_status_key_fails_closed() {
        let parsed = gateway().parse_webhook(&json!({ "refid": "ref-77" }));
        assert_eq!(parsed.status, PayoutStatus::Failed);
    }

    #[test]
    fn pending_status_survives_normalization() {
        let outcome = PaysprintGateway::outcome_from(true, json!({ "txn_status": "PENDING" }));
        assert_eq!(outcome.status, PayoutStatus::Pending);
    }
}
