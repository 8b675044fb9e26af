use anyhow::Result;
use payout_engine::config::Config;
use payout_engine::executor::{ExecutorContext, spawn_sweeper, spawn_worker};
use payout_engine::gateway::GatewayRegistry;
use payout_engine::notify::sink_from_config;
use payout_engine::types::AppState;
use payout_engine::{init_pool, init_router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let pool = init_pool(&config.database_url).await?;
    let gateways = Arc::new(GatewayRegistry::from_config(&config)?);
    let notifier = sink_from_config(&config);

    let ctx = ExecutorContext {
        pool: pool.clone(),
        gateways: gateways.clone(),
        notifier: notifier.clone(),
        stale_after: chrono::Duration::seconds(config.stale_after_secs),
    };
    let (queue, _worker) = spawn_worker(ctx.clone());
    let _sweeper = spawn_sweeper(ctx, Duration::from_secs(config.sweep_interval_secs));

    let app_state = AppState {
        pool,
        config: config.clone(),
        gateways,
        queue,
        notifier,
    };

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    axum::serve(listener, init_router(app_state)).await?;
    Ok(())
}
