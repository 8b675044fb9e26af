//! Earnings and payout settlement engine for the cashback platform.
//!
//! The core turns validated conversions into ledger entries, batches them
//! into per-recipient payouts, drives those through interchangeable payment
//! gateways and reconciles asynchronous gateway webhooks idempotently.

pub mod api;
pub mod commission;
pub mod config;
mod error;
pub mod executor;
pub mod gateway;
pub mod ledger;
pub mod notify;
pub mod payout;
pub mod reconcile;
pub mod responses;
pub mod store;
pub mod types;

use anyhow::Context;
use anyhow::Result;
use sqlx::{PgPool, postgres::PgPoolOptions};

pub use api::init_router;
pub use error::SettlementError;
pub use types::{AppState, ConversionContext, Earning, EventRule, Payout, PayoutStatus};

/// Initializes the database pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}
