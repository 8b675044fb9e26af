//! Payout status-changed notification funnel.
//!
//! The executor, webhook reconciliation and the status sweep all report
//! through [`NotificationSink`]; the settlement core never knows which
//! channel (log line, downstream webhook, chat bot) actually delivers.

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::types::Payout;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Called with the freshly reloaded payout after every status write.
    async fn payout_status_changed(&self, payout: &Payout);
}

/// Default sink: a structured log line.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn payout_status_changed(&self, payout: &Payout) {
        info!(
            payout_id = %payout.id,
            reference_id = %payout.reference_id,
            status = %payout.status,
            amount = payout.total_amount,
            "payout status changed"
        );
    }
}

/// Posts the settled payout to a configured downstream URL. Delivery is
/// best-effort; a failed notification never affects settlement state.
pub struct WebhookNotifier {
    url: String,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: String, http: Client) -> Self {
        Self { url, http }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn payout_status_changed(&self, payout: &Payout) {
        LogNotifier.payout_status_changed(payout).await;
        let result = self.http.post(&self.url).json(payout).send().await;
        if let Err(e) = result {
            warn!(payout_id = %payout.id, error = %e, "notification webhook delivery failed");
        }
    }
}

/// Picks the sink for the current configuration.
pub fn sink_from_config(cfg: &Config) -> Arc<dyn NotificationSink> {
    match &cfg.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), Client::new())),
        None => Arc::new(LogNotifier),
    }
}
