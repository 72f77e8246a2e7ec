use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use task_relay::billing::{ConfiguredRates, PgLedger, SettlementEngine};
use task_relay::channels::PgChannelDirectory;
use task_relay::config;
use task_relay::relay::AdaptorRegistry;
use task_relay::tasks::{spawn_task_poller, PgTaskStore, Reconciler};
use task_relay::telemetry;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let settlement = SettlementEngine::new(
        Arc::new(PgLedger::new(pool.clone())),
        Arc::new(ConfiguredRates::from_config()),
    );
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(PgTaskStore::new(pool.clone())),
        Arc::new(PgChannelDirectory::new(pool.clone())),
        AdaptorRegistry::bootstrap()?,
        settlement,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = spawn_task_poller(reconciler, shutdown_rx);
    tracing::info!(
        interval_secs = *config::TASK_POLL_INTERVAL_SECS,
        "async task poller started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, waiting for in-flight polls");
    let _ = shutdown_tx.send(true);
    poller.await?;
    Ok(())
}
