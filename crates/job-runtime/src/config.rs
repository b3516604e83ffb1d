use training_core::TrainError;

/// Worker-tier configuration, read once at startup from the environment
/// (`.env` is loaded by the binaries before this runs).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub redis_url: String,
    /// Base name of the durable queue.
    pub queue_name: String,
    /// Soft per-job budget; expiry fails the job with reason TIMEOUT.
    pub job_timeout_secs: u64,
    /// How long one blocking dequeue waits before the loop comes up for air.
    pub dequeue_block_secs: f64,
    /// Trials below this trade count are invalid (optimizer floor).
    pub min_trades: i32,
    /// How often the cancellation watcher polls the job store.
    pub cancel_poll_secs: u64,
    /// Cap on the dead-token list.
    pub failed_retention: i64,
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, TrainError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| TrainError::SystemError("DATABASE_URL is not set".to_string()))?;
        let redis_url = std::env::var("REDIS_URL")
            .map_err(|_| TrainError::SystemError("REDIS_URL is not set".to_string()))?;

        Ok(Self {
            database_url,
            redis_url,
            queue_name: env_or("TRAINING_QUEUE", "training"),
            job_timeout_secs: env_parse("JOB_TIMEOUT_SECS", 12 * 3600),
            dequeue_block_secs: env_parse("DEQUEUE_BLOCK_SECS", 5.0),
            min_trades: env_parse("MIN_TRADES_THRESHOLD", 3),
            cancel_poll_secs: env_parse("CANCEL_POLL_SECS", 2),
            failed_retention: env_parse("QUEUE_FAILED_RETENTION", 100),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
