use std::sync::Arc;

use attune_queue::{JobQueue, PostgresQueueStore, RecoverySupervisor};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod backends;
mod config;
mod runner;

use backends::HttpGenerationBackend;
use runner::WorkerRunner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attune_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = config::Config::from_env()?;

    tracing::info!(worker_id = %config.worker_id, "Starting Attune worker");

    let pool = PgPoolOptions::new()
        .max_connections(config.common.database.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            config.common.database.connect_timeout_secs,
        ))
        .connect(&config.common.database.url)
        .await?;
    tracing::info!("Database connection established");

    let store = Arc::new(PostgresQueueStore::new(pool));
    let queue = JobQueue::new(store, config.max_attempts());

    // Orphaned work from a previous run is re-queued (or failed) before any
    // new claims happen.
    let supervisor = RecoverySupervisor::new(
        queue.clone(),
        config.recovery_mode()?,
        config.stall_timeout(),
    );
    supervisor.recover_on_startup().await?;

    let shutdown = CancellationToken::new();

    let watchdog = {
        let token = shutdown.clone();
        tokio::spawn(async move { supervisor.run_watchdog(token).await })
    };

    {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                token.cancel();
            }
        });
    }

    let backend = Arc::new(HttpGenerationBackend::new(
        config.common.generation.clone(),
    )?);
    let runner = WorkerRunner::new(
        queue,
        backend,
        config.worker_id.clone(),
        config.stages.clone(),
        config.poll_interval(),
        config.heartbeat_interval(),
        config.max_concurrent_tasks(),
    );

    runner.run(shutdown.clone()).await;

    shutdown.cancel();
    watchdog.await.ok();

    Ok(())
}
