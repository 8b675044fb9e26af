//! Payment gateway integrations.
//!
//! Each supported gateway implements [`PaymentGateway`], normalizing its own
//! HTTP API into the three-valued settlement vocabulary. Business failures
//! (non-2xx, malformed bodies, declined transfers) are ordinary outcomes
//! with `status = FAILED`; only transport-level problems surface as
//! [`GatewayError`], and the executor catches those at its boundary.

mod cashfree;
mod paysprint;
mod razorpayx;
mod upigateway;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::error::SettlementError;
use crate::types::PayoutStatus;

pub use cashfree::CashfreeGateway;
pub use paysprint::PaysprintGateway;
pub use razorpayx::RazorpayxGateway;
pub use upigateway::UpigatewayGateway;

/// Transport-level gateway failure. Anything the remote side answered,
/// however broken, is an outcome instead.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One outbound disbursement request.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    /// Recipient UPI handle.
    pub upi: String,
    /// Amount to transfer.
    pub amount: i64,
    /// Platform correlation token, echoed back by webhooks.
    pub reference_id: String,
    /// Operator comment forwarded as the transfer narration.
    pub comment: Option<String>,
}

/// Normalized result of a gateway call.
#[derive(Debug, Clone)]
pub struct PaymentOutcome {
    pub status: PayoutStatus,
    pub payment_id: Option<String>,
    /// Raw response body, kept verbatim for diagnostics.
    pub api_response: Value,
}

/// Identifiers and status extracted from an asynchronous gateway webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookData {
    pub status: PayoutStatus,
    pub payment_id: Option<String>,
    pub reference_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Executes a transfer synchronously.
    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentOutcome, GatewayError>;

    /// Polls the current status of an earlier transfer.
    async fn fetch_payment_status(
        &self,
        payment_id: Option<&str>,
        reference_id: &str,
    ) -> Result<PaymentOutcome, GatewayError>;

    /// Extracts status and correlation identifiers from a webhook payload.
    /// Pure; field paths are gateway-specific.
    fn parse_webhook(&self, payload: &Value) -> WebhookData;
}

/// Maps a gateway-reported status value onto the settlement vocabulary.
///
/// Fail-closed: missing, empty, non-scalar or unrecognized values are all
/// FAILED. An ambiguous gateway answer must never read as money sent.
pub fn normalize_status(raw: Option<&Value>) -> PayoutStatus {
    let Some(Value::String(s)) = raw else {
        return PayoutStatus::Failed;
    };
    match s.to_lowercase().as_str() {
        "success" => PayoutStatus::Success,
        "pending" => PayoutStatus::Pending,
        _ => PayoutStatus::Failed,
    }
}

/// Stringifies a scalar identifier field. Gateways disagree on whether ids
/// are JSON strings or numbers.
pub(crate) fn scalar_string(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fabricates a beneficiary display name from a UPI handle. The gateways
/// insist on one and the platform never collects it.
pub(crate) fn beneficiary_name(upi: &str) -> String {
    let local = upi.split('@').next().unwrap_or("");
    let words: Vec<String> = local
        .split(['.', '_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let cleaned: String = part.chars().filter(|c| c.is_ascii_alphabetic()).collect();
            let mut chars = cleaned.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .filter(|word| !word.is_empty())
        .collect();

    if words.is_empty() {
        "Cashback User".to_string()
    } else {
        words.join(" ")
    }
}

/// Reads a response body, preserving non-JSON bodies for diagnostics.
/// Returns whether the HTTP status was 2xx alongside the parsed body.
pub(crate) async fn json_or_raw(resp: reqwest::Response) -> Result<(bool, Value), GatewayError> {
    let ok = resp.status().is_success();
    let text = resp.text().await?;
    let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));
    Ok((ok, body))
}

/// Constructs gateway adapters from persisted credentials.
pub struct GatewayRegistry {
    active: String,
    http: Client,
    cashfree: Option<crate::config::CashfreeConfig>,
    razorpayx: Option<crate::config::RazorpayxConfig>,
    paysprint: Option<crate::config::PaysprintConfig>,
    upigateway: Option<crate::config::UpigatewayConfig>,
}

impl GatewayRegistry {
    pub fn from_config(cfg: &Config) -> Result<Self, SettlementError> {
        // Gateways whitelist fixed outbound IPs, so egress must stay on IPv4.
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
            .build()
            .map_err(|e| SettlementError::Config(format!("http client: {e}")))?;

        Ok(Self {
            active: cfg.active_gateway.clone(),
            http,
            cashfree: cfg.cashfree.clone(),
            razorpayx: cfg.razorpayx.clone(),
            paysprint: cfg.paysprint.clone(),
            upigateway: cfg.upigateway.clone(),
        })
    }

    /// Name of the gateway new payouts are routed through.
    pub fn active_name(&self) -> &str {
        &self.active
    }

    /// Resolves a gateway by name. `None` means the name is unknown or its
    /// credentials are not configured; callers treat that as a
    /// configuration error, never as a reason to pick a different gateway.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn PaymentGateway>> {
        match name {
            cashfree::NAME => self.cashfree.clone().map(|c| {
                Arc::new(CashfreeGateway::new(c, self.http.clone())) as Arc<dyn PaymentGateway>
            }),
            razorpayx::NAME => self.razorpayx.clone().map(|c| {
                Arc::new(RazorpayxGateway::new(c, self.http.clone())) as Arc<dyn PaymentGateway>
            }),
            paysprint::NAME => self.paysprint.clone().map(|c| {
                Arc::new(PaysprintGateway::new(c, self.http.clone())) as Arc<dyn PaymentGateway>
            }),
            upigateway::NAME => self.upigateway.clone().map(|c| {
                Arc::new(UpigatewayGateway::new(c, self.http.clone())) as Arc<dyn PaymentGateway>
            }),
            _ => None,
        }
    }

    pub fn resolve_active(&self) -> Result<Arc<dyn PaymentGateway>, SettlementError> {
        self.resolve(&self.active).ok_or_else(|| {
            SettlementError::Config(format!("active gateway '{}' is not resolvable", self.active))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CashfreeConfig;

    fn config_with_cashfree() -> Config {
        Config {
            server_port: 8000,
            database_url: "postgres://localhost/test".to_string(),
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

    #[test]
    fn status_normalization_is_fail_closed() {
        assert_eq!(normalize_status(None), PayoutStatus::Failed);
        assert_eq!(normalize_status(Some(&json!(null))), PayoutStatus::Failed);
        assert_eq!(normalize_status(Some(&json!(""))), PayoutStatus::Failed);
        assert_eq!(normalize_status(Some(&json!(1))), PayoutStatus::Failed);
        assert_eq!(normalize_status(Some(&json!(true))), PayoutStatus::Failed);
        assert_eq!(
            normalize_status(Some(&json!({"nested": "success"}))),
            PayoutStatus::Failed
        );
        assert_eq!(
            normalize_status(Some(&json!("processed"))),
            PayoutStatus::Failed
        );
    }

    #[test]
    fn status_normalization_is_case_insensitive() {
        assert_eq!(
            normalize_status(Some(&json!("SUCCESS"))),
            PayoutStatus::Success
        );
        assert_eq!(
            normalize_status(Some(&json!("Pending"))),
            PayoutStatus::Pending
        );
        assert_eq!(
            normalize_status(Some(&json!("failure"))),
            PayoutStatus::Failed
        );
    }

    #[test]
    fn scalar_string_handles_numbers_and_strings() {
        assert_eq!(scalar_string(Some(&json!("abc"))), Some("abc".to_string()));
        assert_eq!(scalar_string(Some(&json!(42))), Some("42".to_string()));
        assert_eq!(scalar_string(Some(&json!(""))), None);
        assert_eq!(scalar_string(Some(&json!({"id": 1}))), None);
        assert_eq!(scalar_string(None), None);
    }

    #[test]
    fn beneficiary_name_from_upi_handle() {
        assert_eq!(beneficiary_name("ravi.kumar@okaxis"), "Ravi Kumar");
        assert_eq!(beneficiary_name("anita_s@ybl"), "Anita S");
        assert_eq!(beneficiary_name("9876543210@paytm"), "Cashback User");
        assert_eq!(beneficiary_name(""), "Cashback User");
    }

    #[test]
    fn resolver_returns_none_for_unknown_or_unconfigured() {
        let registry = GatewayRegistry::from_config(&config_with_cashfree()).unwrap();
        assert!(registry.resolve("cashfree").is_some());
        assert!(registry.resolve("razorpayx").is_none());
        assert!(registry.resolve("does-not-exist").is_none());
    }

    #[test]
    fn resolve_active_errors_when_unresolvable() {
        let mut cfg = config_with_cashfree();
        cfg.active_gateway = "razorpayx".to_string();
        let registry = GatewayRegistry::from_config(&cfg).unwrap();
        assert!(matches!(
            registry.resolve_active().err(),
            Some(SettlementError::Config(_))
        ));
    }
}
