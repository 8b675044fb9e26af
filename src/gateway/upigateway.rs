//! UPIGateway integration. The API key travels as a query parameter and
//! every interesting field sits under a `data` envelope.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{
    GatewayError, PaymentGateway, PaymentOutcome, PaymentRequest, WebhookData, beneficiary_name,
    json_or_raw, normalize_status, scalar_string,
};
use crate::config::UpigatewayConfig;
use crate::types::PayoutStatus;

pub(super) const NAME: &str = "upigateway";

pub struct UpigatewayGateway {
    cfg: UpigatewayConfig,
    http: Client,
}

impl UpigatewayGateway {
    pub fn new(cfg: UpigatewayConfig, http: Client) -> Self {
        Self { cfg, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path)
    }

    fn outcome_from(ok: bool, body: Value) -> PaymentOutcome {
        let payment_id = scalar_string(body.pointer("/data/upi_txn_id"));
        let status = if ok {
            normalize_status(body.pointer("/data/status"))
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
impl PaymentGateway for UpigatewayGateway {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentOutcome, GatewayError> {
        let body = json!({
            "client_txn_id": request.reference_id,
            "upi_id": request.upi,
            "customer_name": beneficiary_name(&request.upi),
            "amount": request.amount,
            "note": request.comment.as_deref().unwrap_or("cashback payout"),
        });

        let resp = self
            .http
            .post(self.url("/api/v2/payout"))
            .query(&[("key", self.cfg.api_key.as_str())])
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
            .get(self.url("/api/v2/payout/status"))
            .query(&[
                ("key", self.cfg.api_key.as_str()),
                ("client_txn_id", reference_id),
            ])
            .send()
            .await?;

        let (ok, body) = json_or_raw(resp).await?;
        Ok(Self::outcome_from(ok, body))
    }

    fn parse_webhook(&self, payload: &Value) -> WebhookData {
        WebhookData {
            status: normalize_status(payload.pointer("/data/status")),
            payment_id: scalar_string(payload.pointer("/data/upi_txn_id")),
            reference_id: scalar_string(payload.pointer("/data/client_txn_id")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> UpigatewayGateway {
        UpigatewayGateway::new(
            UpigatewayConfig {
                api_key: "api-key".to_string(),
                base_url: "https://api.upigateway.com".to_string(),
            },
            Client::new(),
        )
    }

    #[test]
    fn webhook_reads_data_envelope() {
        let payload = json!({
            "data": {
                "status": "success",
                "upi_txn_id": "UTR123456",
                "client_txn_id": "ref-9",
            },
        });
        let parsed = gateway().parse_webhook(&payload);
        assert_eq!(parsed.status, PayoutStatus::Success);
        assert_eq!(parsed.payment_id.as_deref(), Some("UTR123456"));
        assert_eq!(parsed.reference_id.as_deref(), Some("ref-9"));
    }

    #[test]
    fn flat_payload_without_envelope_fails_closed() {
        let parsed = gateway().parse_webhook(&json!({ "status": "success" }));
        assert_eq!(parsed.status, PayoutStatus::Failed);
        assert_eq!(parsed.reference_id, None);
    }
}
