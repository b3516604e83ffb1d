use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use training_core::{JobRequest, JobStatus, TrainedConfiguration, TrainingJob, TrainError};

/// Hard cap on persisted error messages.
pub const MAX_ERROR_LEN: usize = 1_000;

const JOB_COLUMNS: &str = "job_id, status, strategy_name, symbol, exchange, timeframe, regime, \
     optimizer_kind, lookback_candles, n_iterations, seed, filter_config, run_validation, \
     progress_pct::float8 AS progress_pct, current_episode, total_episodes, \
     current_candle, total_candles, best_score::float8 AS best_score, \
     error_message, created_at, started_at, completed_at, config_id";

/// The relational job store. Owns the `training_jobs` and
/// `trained_configurations` relations; all status transitions go through
/// here so the terminal-state and monotonicity guards live in one place.
#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct JobRow {
    job_id: Uuid,
    status: String,
    strategy_name: String,
    symbol: String,
    exchange: String,
    timeframe: String,
    regime: String,
    optimizer_kind: String,
    lookback_candles: i64,
    n_iterations: i64,
    seed: i64,
    filter_config: serde_json::Value,
    run_validation: bool,
    progress_pct: f64,
    current_episode: i32,
    total_episodes: i32,
    current_candle: i32,
    total_candles: i32,
    best_score: Option<f64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    config_id: Option<Uuid>,
}

impl JobRow {
    fn into_job(self) -> Result<TrainingJob, TrainError> {
        Ok(TrainingJob {
            job_id: self.job_id,
            status: self.status.parse::<JobStatus>()?,
            strategy_name: self.strategy_name,
            symbol: self.symbol,
            exchange: self.exchange,
            timeframe: self.timeframe,
            regime: self.regime,
            optimizer_kind: self.optimizer_kind,
            lookback_candles: self.lookback_candles,
            n_iterations: self.n_iterations,
            seed: self.seed,
            filter_config: serde_json::from_value(self.filter_config)
                .map_err(TrainError::system)?,
            run_validation: self.run_validation,
            progress_pct: self.progress_pct,
            current_episode: self.current_episode,
            total_episodes: self.total_episodes,
            current_candle: self.current_candle,
            total_candles: self.total_candles,
            best_score: self.best_score,
            error_message: self.error_message,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            config_id: self.config_id,
        })
    }
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, TrainError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(TrainError::system)?;
        Ok(Self::new(pool))
    }

    /// Create the job and configuration relations if they do not exist.
    /// Run once at worker startup.
    pub async fn init_schema(&self) -> Result<(), TrainError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS training_jobs (
                job_id UUID PRIMARY KEY,
                status TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                regime TEXT NOT NULL,
                optimizer_kind TEXT NOT NULL,
                lookback_candles BIGINT NOT NULL,
                n_iterations BIGINT NOT NULL,
                seed BIGINT NOT NULL,
                filter_config JSONB NOT NULL,
                run_validation BOOLEAN NOT NULL DEFAULT false,
                progress_pct NUMERIC(5,2) NOT NULL DEFAULT 0,
                current_episode INT NOT NULL DEFAULT 0,
                total_episodes INT NOT NULL DEFAULT 0,
                current_candle INT NOT NULL DEFAULT 0,
                total_candles INT NOT NULL DEFAULT 0,
                best_score NUMERIC,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                config_id UUID
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_training_jobs_status
             ON training_jobs (status)",
        )
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trained_configurations (
                config_id UUID PRIMARY KEY,
                strategy_name TEXT NOT NULL,
                symbol TEXT NOT NULL,
                exchange TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                regime TEXT NOT NULL,
                parameters JSONB NOT NULL,
                metrics JSONB NOT NULL,
                lifecycle_stage TEXT NOT NULL DEFAULT 'DISCOVERY',
                filter_config JSONB NOT NULL,
                seed BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (strategy_name, symbol, exchange, timeframe, regime)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;

        Ok(())
    }

    /// Insert a validated request as a PENDING job and return its id.
    pub async fn insert_job(&self, request: &JobRequest) -> Result<Uuid, TrainError> {
        let job_id = Uuid::new_v4();
        let filter_json =
            serde_json::to_value(&request.filter_config).map_err(TrainError::system)?;

        sqlx::query(
            "INSERT INTO training_jobs (
                job_id, status, strategy_name, symbol, exchange, timeframe, regime,
                optimizer_kind, lookback_candles, n_iterations, seed, filter_config,
                run_validation
            ) VALUES ($1, 'PENDING', $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(job_id)
        .bind(&request.strategy_name)
        .bind(&request.symbol)
        .bind(&request.exchange)
        .bind(&request.timeframe)
        .bind(&request.regime)
        .bind(&request.optimizer_kind)
        .bind(request.lookback_candles)
        .bind(request.n_iterations)
        .bind(request.seed)
        .bind(filter_json)
        .bind(request.run_validation)
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;

        Ok(job_id)
    }

    /// CAS claim: PENDING → RUNNING. Returns None when the job was already
    /// claimed, cancelled or finished — the idempotency guard for
    /// at-least-once token delivery.
    pub async fn claim(&self, job_id: Uuid) -> Result<Option<TrainingJob>, TrainError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "UPDATE training_jobs
             SET status = 'RUNNING', started_at = now()
             WHERE job_id = $1 AND status = 'PENDING'
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(TrainError::system)?;

        row.map(JobRow::into_job).transpose()
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<TrainingJob>, TrainError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM training_jobs WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(TrainError::system)?;

        row.map(JobRow::into_job).transpose()
    }

    /// Write one progress snapshot. Monotone fields use GREATEST so
    /// out-of-order arrivals can never walk progress backwards; only a
    /// RUNNING job accepts updates (terminal jobs freeze their last value).
    #[allow(clippy::too_many_arguments)]
    pub async fn update_progress(
        &self,
        job_id: Uuid,
        progress_pct: f64,
        current_episode: i32,
        total_episodes: i32,
        current_candle: i32,
        total_candles: i32,
        best_score: Option<f64>,
    ) -> Result<(), TrainError> {
        sqlx::query(
            "UPDATE training_jobs SET
                progress_pct = GREATEST(progress_pct, $2::numeric),
                current_episode = GREATEST(current_episode, $3),
                total_episodes = GREATEST(total_episodes, $4),
                current_candle = $5,
                total_candles = GREATEST(total_candles, $6),
                best_score = GREATEST(best_score, $7::numeric)
             WHERE job_id = $1 AND status = 'RUNNING'",
        )
        .bind(job_id)
        .bind(progress_pct)
        .bind(current_episode)
        .bind(total_episodes)
        .bind(current_candle)
        .bind(total_candles)
        .bind(best_score)
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;
        Ok(())
    }

    /// Terminal transition to COMPLETED with the configuration reference.
    pub async fn complete(&self, job_id: Uuid, config_id: Uuid) -> Result<(), TrainError> {
        sqlx::query(
            "UPDATE training_jobs
             SET status = 'COMPLETED', completed_at = now(),
                 progress_pct = 100, config_id = $2
             WHERE job_id = $1
               AND status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')",
        )
        .bind(job_id)
        .bind(config_id)
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;
        Ok(())
    }

    /// Terminal transition to FAILED with a bounded error message.
    pub async fn fail(&self, job_id: Uuid, error_message: &str) -> Result<(), TrainError> {
        sqlx::query(
            "UPDATE training_jobs
             SET status = 'FAILED', completed_at = now(), error_message = $2
             WHERE job_id = $1
               AND status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')",
        )
        .bind(job_id)
        .bind(truncate_error(error_message))
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;
        Ok(())
    }

    /// Submitter-side transition to CANCELLED. Returns false when the job
    /// was already terminal.
    pub async fn mark_cancelled(&self, job_id: Uuid) -> Result<bool, TrainError> {
        let result = sqlx::query(
            "UPDATE training_jobs
             SET status = 'CANCELLED', completed_at = now()
             WHERE job_id = $1
               AND status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;
        Ok(result.rows_affected() > 0)
    }

    /// Poll used by the worker's cancellation watcher.
    pub async fn is_cancelled(&self, job_id: Uuid) -> Result<bool, TrainError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM training_jobs WHERE job_id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(TrainError::system)?;
        Ok(matches!(status, Some((s,)) if s == "CANCELLED"))
    }

    /// Orphan sweep: transition every RUNNING job to CANCELLED. Called only
    /// when no live worker process can own them.
    pub async fn cancel_all_running(&self) -> Result<Vec<Uuid>, TrainError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "UPDATE training_jobs
             SET status = 'CANCELLED', completed_at = now()
             WHERE status = 'RUNNING'
             RETURNING job_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(TrainError::system)?;

        let swept: Vec<Uuid> = rows.into_iter().map(|(id,)| id).collect();
        if !swept.is_empty() {
            info!(count = swept.len(), "orphan sweep cancelled running jobs");
        }
        Ok(swept)
    }

    /// Upsert the winning configuration. One row per
    /// (strategy, symbol, exchange, timeframe, regime); a retrain replaces
    /// parameters and metrics in place.
    pub async fn upsert_configuration(
        &self,
        config: &TrainedConfiguration,
    ) -> Result<(), TrainError> {
        let parameters = serde_json::to_value(&config.parameters).map_err(TrainError::system)?;
        let filter_json =
            serde_json::to_value(&config.filter_config).map_err(TrainError::system)?;

        sqlx::query(
            "INSERT INTO trained_configurations (
                config_id, strategy_name, symbol, exchange, timeframe, regime,
                parameters, metrics, lifecycle_stage, filter_config, seed, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (strategy_name, symbol, exchange, timeframe, regime)
            DO UPDATE SET
                config_id = EXCLUDED.config_id,
                parameters = EXCLUDED.parameters,
                metrics = EXCLUDED.metrics,
                filter_config = EXCLUDED.filter_config,
                seed = EXCLUDED.seed,
                created_at = EXCLUDED.created_at",
        )
        .bind(config.config_id)
        .bind(&config.strategy_name)
        .bind(&config.symbol)
        .bind(&config.exchange)
        .bind(&config.timeframe)
        .bind(&config.regime)
        .bind(parameters)
        .bind(&config.metrics)
        .bind(config.lifecycle_stage.as_str())
        .bind(filter_json)
        .bind(config.seed)
        .bind(config.created_at)
        .execute(&self.pool)
        .await
        .map_err(TrainError::system)?;
        Ok(())
    }
}

/// Clamp an error message to `MAX_ERROR_LEN` characters on a char boundary.
pub fn truncate_error(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_LEN) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
