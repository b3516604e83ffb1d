//! training-worker: the compute tier.
//!
//! Blocks on the durable `training` queue, claims one job at a time and
//! runs the full pipeline (fetch → clean → optimize → persist). One job in
//! flight per process; trial-level parallelism happens inside the
//! optimizer's worker pool.
//!
//! Usage:
//!   DATABASE_URL=postgres://... REDIS_URL=redis://... training-worker
//!
//! Tuning (all optional): TRAINING_QUEUE, JOB_TIMEOUT_SECS,
//! DEQUEUE_BLOCK_SECS, MIN_TRADES_THRESHOLD, CANCEL_POLL_SECS,
//! QUEUE_FAILED_RETENTION, RUST_LOG.

use market_data::MarketDataStore;

use job_runtime::{JobStore, TrainingQueue, Worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "job_runtime=info,market_data=info,optimizer=info".into()),
        )
        .init();

    let config = WorkerConfig::from_env()?;

    let pool = sqlx::PgPool::connect(&config.database_url).await?;
    let store = JobStore::new(pool.clone());
    store.init_schema().await?;

    let queue = TrainingQueue::connect(
        &config.redis_url,
        &config.queue_name,
        config.failed_retention,
    )
    .await?;
    let market = MarketDataStore::new(pool);

    let mut worker = Worker::new(store, queue, market, config);
    worker.run().await?;
    Ok(())
}
