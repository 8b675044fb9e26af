//! Cashfree Payouts integration. Authenticates with a client id + secret
//! header pair; transfer status lives at the top level of responses and
//! under `data.transfer` in webhooks.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{
    GatewayError, PaymentGateway, PaymentOutcome, PaymentRequest, WebhookData, beneficiary_name,
    json_or_raw, normalize_status, scalar_string,
};
use crate::config::CashfreeConfig;
use crate::types::PayoutStatus;

pub(super) const NAME: &str = "cashfree";

pub struct CashfreeGateway {
    cfg: CashfreeConfig,
    http: Client,
}

impl CashfreeGateway {
    pub fn new(cfg: CashfreeConfig, http: Client) -> Self {
        Self { cfg, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn outcome_from(ok: bool, body: Value) -> PaymentOutcome {
        let payment_id = scalar_string(body.pointer("/data/referenceId"));
        let status = if ok {
            normalize_status(body.get("status"))
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
impl PaymentGateway for CashfreeGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentOutcome, GatewayError> {
        let body = json!({
            "amount": request.amount,
            "transferId": request.reference_id,
            "transferMode": "upi",
            "remarks": request.comment.as_deref().unwrap_or("cashback payout"),
            "beneDetails": {
                "vpa": request.upi,
                "name": beneficiary_name(&request.upi),
            },
        });

        let resp = self
            .http
            .post(self.url("/payout/v1/directTransfer"))
            .header("X-Client-Id", &self.cfg.client_id)
            .header("X-Client-Secret", &self.cfg.client_secret)
            .json(&body)
            .send()
            .await?;

        let (ok, body) = json_or_raw(resp).await?;
        Ok(Self::outcome_from(ok, body))
    }

    async fn fetch_payment_status(
        &self,
        _payment_id: Option<&str>,
        reference_id: &str,
    ) -> Result<PaymentOutcome, GatewayError> {
        let resp = self
            .http
            .get(self.url("/payout/v1/getTransferStatus"))
            .query(&[("transferId", reference_id)])
            .header("X-Client-Id", &self.cfg.client_id)
            .header("X-Client-Secret", &self.cfg.client_secret)
            .send()
            .await?;

        let (ok, body) = json_or_raw(resp).await?;
        let payment_id = scalar_string(body.pointer("/data/transfer/referenceId"));
        let status = if ok {
            normalize_status(body.pointer("/data/transfer/status"))
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
        WebhookData {
            status: normalize_status(payload.pointer("/data/transfer/status")),
            payment_id: scalar_string(payload.pointer("/data/transfer/referenceId")),
            reference_id: scalar_string(payload.pointer("/data/transfer/transferId")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> CashfreeGateway {
        CashfreeGateway::new(
            CashfreeConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                base_url: "https://payout-api.cashfree.com".to_string(),
            },
            Client::new(),
        )
    }

    #[test]
    fn webhook_extracts_nested_transfer_fields() {
        let payload = json!({
            "event": "TRANSFER_SUCCESS",
            "data": { "transfer": {
                "transferId": "ref-123",
                "referenceId": 987654,
                "status": "SUCCESS",
            }},
        });
        let parsed = gateway().parse_webhook(&payload);
        assert_eq!(parsed.status, PayoutStatus::Success);
        assert_eq!(parsed.payment_id.as_deref(), Some("987654"));
        assert_eq!(parsed.reference_id.as_deref(), Some("ref-123"));
    }

    #[test]
    fn webhook_with_unknown_status_is_failed() {
        let payload = json!({
            "data": { "transfer": { "transferId": "ref-1", "status": "REVERSED" }},
        });
        let parsed = gateway().parse_webhook(&payload);
        assert_eq!(parsed.status, PayoutStatus::Failed);
        assert_eq!(parsed.reference_id.as_deref(), Some("ref-1"));
    }

    #[test]
    fn non_2xx_response_is_a_failed_outcome() {
        let body = json!({ "status": "SUCCESS", "data": { "referenceId": 1 } });
        let outcome = CashfreeGateway::outcome_from(false, body);
        assert_eq!(outcome.status, PayoutStatus::Failed);
    }
}
