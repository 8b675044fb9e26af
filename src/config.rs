use serde::Deserialize;

/// Application configuration, loaded from the environment.
///
/// Gateway credential blocks are optional: a gateway with no block simply
/// does not resolve. Nested fields use `__` in variable names, e.g.
/// `CASHFREE__CLIENT_ID`.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// Name of the gateway new payouts are routed through.
    pub active_gateway: String,
    /// Outbound HTTP timeout for gateway calls, in seconds.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Age after which a PENDING payout is picked up by the status sweep.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
    /// Interval between automatic reconciliation sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Optional URL notified on every payout status change.
    #[serde(default)]
    pub notify_webhook_url: Option<String>,
    #[serde(default)]
    pub cashfree: Option<CashfreeConfig>,
    #[serde(default)]
    pub razorpayx: Option<RazorpayxConfig>,
    #[serde(default)]
    pub paysprint: Option<PaysprintConfig>,
    #[serde(default)]
    pub upigateway: Option<UpigatewayConfig>,
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> i64 {
    900
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Cashfree Payouts credentials (client id + secret header pair).
#[derive(Debug, Deserialize, Clone)]
pub struct CashfreeConfig {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_cashfree_base_url")]
    pub base_url: String,
}

fn default_cashfree_base_url() -> String {
    "https://payout-api.cashfree.com".to_string()
}

/// RazorpayX credentials (HTTP basic auth plus source account).
#[derive(Debug, Deserialize, Clone)]
pub struct RazorpayxConfig {
    pub key_id: String,
    pub key_secret: String,
    pub account_number: String,
    #[serde(default = "default_razorpayx_base_url")]
    pub base_url: String,
}

fn default_razorpayx_base_url() -> String {
    "https://api.razorpay.com".to_string()
}

/// PaySprint credentials (bearer token).
#[derive(Debug, Deserialize, Clone)]
pub struct PaysprintConfig {
    pub token: String,
    #[serde(default = "default_paysprint_base_url")]
    pub base_url: String,
}

fn default_paysprint_base_url() -> String {
    "https://api.paysprint.in".to_string()
}

/// UPIGateway credentials (API key passed as a query parameter).
#[derive(Debug, Deserialize, Clone)]
pub struct UpigatewayConfig {
    pub api_key: String,
    #[serde(default = "default_upigateway_base_url")]
    pub base_url: String,
}

fn default_upigateway_base_url() -> String {
    "https://api.upigateway.com".to_string()
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        config.try_deserialize()
    }
}
