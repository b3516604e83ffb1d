use tracing::info;
use uuid::Uuid;

use strategy_engine::create_strategy;
use training_core::{JobRequest, OptimizerKind, Regime, Timeframe, TrainError, TrainingJob};

use crate::queue::TrainingQueue;
use crate::store::JobStore;

/// Every closed set and bound is checked here, before anything is written:
/// an InvalidRequest never creates a job row and never reaches the queue.
pub fn validate_request(request: &JobRequest) -> Result<(), TrainError> {
    create_strategy(&request.strategy_name)?;
    request.timeframe.parse::<Timeframe>()?;
    request.regime.parse::<Regime>()?;
    request.optimizer_kind.parse::<OptimizerKind>()?;

    if request.n_iterations < 1 {
        return Err(TrainError::InvalidRequest(format!(
            "n_iterations must be at least 1, got {}",
            request.n_iterations
        )));
    }
    if request.lookback_candles < 100 {
        return Err(TrainError::InvalidRequest(format!(
            "lookback_candles must be at least 100, got {}",
            request.lookback_candles
        )));
    }
    if request.seed < 0 {
        return Err(TrainError::InvalidRequest(format!(
            "seed must be non-negative, got {}",
            request.seed
        )));
    }
    if request.symbol.trim().is_empty() || request.exchange.trim().is_empty() {
        return Err(TrainError::InvalidRequest(
            "symbol and exchange must be non-empty".to_string(),
        ));
    }
    let filter = &request.filter_config;
    if filter.min_volume_threshold < 0.0 || filter.min_price_movement_pct < 0.0 {
        return Err(TrainError::InvalidRequest(
            "filter thresholds must be non-negative".to_string(),
        ));
    }
    Ok(())
}

/// Submission boundary: validate, persist the PENDING row, then enqueue the
/// token. The row is written first so a crash between the two steps leaves
/// a visible PENDING job rather than a dangling token.
pub async fn submit_job(
    store: &JobStore,
    queue: &mut TrainingQueue,
    request: JobRequest,
) -> Result<Uuid, TrainError> {
    validate_request(&request)?;
    let job_id = store.insert_job(&request).await?;
    queue.enqueue(&job_id.to_string()).await?;
    info!(
        job_id = %job_id,
        strategy = request.strategy_name,
        symbol = request.symbol,
        optimizer = request.optimizer_kind,
        "job submitted"
    );
    Ok(job_id)
}

/// Full job record, including all three progress levels.
pub async fn get_job(store: &JobStore, job_id: Uuid) -> Result<TrainingJob, TrainError> {
    store
        .get_job(job_id)
        .await?
        .ok_or_else(|| TrainError::InvalidRequest(format!("no job with id {job_id}")))
}
