use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use backtest_engine::{run_backtest, BacktestConfig};
use market_data::{load_series, MarketDataStore};
use optimizer::{optimize, OptimizeConfig, OptimizeOutcome};
use strategy_engine::create_strategy;
use training_core::{
    BacktestMetrics, BarSeries, LifecycleStage, OptimizerKind, Timeframe, TrainedConfiguration,
    TrainError, TrainingJob,
};

use crate::cancel::orphan_sweep;
use crate::config::WorkerConfig;
use crate::progress::{spawn_writer, ProgressPublisher};
use crate::queue::TrainingQueue;
use crate::store::JobStore;

/// Share of the series held out when a job asks for validation.
const VALIDATION_HOLDOUT_FRACTION: f64 = 0.25;

/// One worker process: a plain blocking loop around the durable queue.
/// Async exists only at the broker/database boundary; the optimizer itself
/// runs synchronous and CPU-bound under `spawn_blocking`.
pub struct Worker {
    store: JobStore,
    queue: TrainingQueue,
    market: MarketDataStore,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: JobStore,
        queue: TrainingQueue,
        market: MarketDataStore,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            market,
            config,
        }
    }

    /// Dequeue-claim-process forever. Per-job failures are contained; only
    /// a broken dequeue path (broker gone) surfaces out of the loop.
    pub async fn run(&mut self) -> Result<(), TrainError> {
        // Jobs left RUNNING by a previous incarnation can never finish
        orphan_sweep(&self.store).await?;
        info!(queue_block_secs = self.config.dequeue_block_secs, "worker ready");

        loop {
            let token = match self
                .queue
                .dequeue_blocking(self.config.dequeue_block_secs)
                .await
            {
                Ok(Some(token)) => token,
                Ok(None) => continue,
                Err(err) => return Err(err),
            };

            if let Err(err) = self.handle_token(&token).await {
                error!(token, error = %err, "token handling failed");
            }
        }
    }

    async fn handle_token(&mut self, token: &str) -> Result<(), TrainError> {
        let job_id = match token.parse::<Uuid>() {
            Ok(id) => id,
            Err(_) => {
                warn!(token, "malformed token");
                return self.queue.fail(token).await;
            }
        };

        // CAS claim tolerates duplicate delivery: a second worker (or a
        // redelivered token) finds the job no longer PENDING and walks away.
        let job = match self.store.claim(job_id).await? {
            Some(job) => job,
            None => {
                info!(job_id = %job_id, "job not claimable (duplicate delivery or already cancelled)");
                return self.queue.ack(token).await;
            }
        };

        info!(
            job_id = %job_id,
            strategy = job.strategy_name,
            symbol = job.symbol,
            optimizer = job.optimizer_kind,
            n_iterations = job.n_iterations,
            seed = job.seed,
            "job claimed"
        );

        match self.process(&job).await {
            Ok(config_id) => {
                self.store.complete(job_id, config_id).await?;
                self.queue.ack(token).await?;
                info!(job_id = %job_id, config_id = %config_id, "job completed");
                Ok(())
            }
            Err(err) => {
                if self.store.is_cancelled(job_id).await.unwrap_or(false) {
                    // Submitter-initiated cancel: status is already
                    // terminal, progress stays frozen at its last value
                    info!(job_id = %job_id, "job cancelled; releasing token");
                    return self.queue.ack(token).await;
                }

                let message = err.to_string();
                self.store.fail(job_id, &message).await?;
                self.queue.fail(token).await?;
                error!(job_id = %job_id, error = message, "job failed");

                if message == "TIMEOUT" {
                    // The blocking compute thread is still burning CPU and
                    // only a process death reclaims it; the supervisor
                    // restart gives the next job a clean slate.
                    error!(job_id = %job_id, "job timeout; exiting for a clean worker slate");
                    std::process::exit(1);
                }
                Ok(())
            }
        }
    }

    /// The training pipeline: load → clean → optimize → validate → persist.
    async fn process(&self, job: &TrainingJob) -> Result<Uuid, TrainError> {
        let strategy = create_strategy(&job.strategy_name)?;
        let timeframe: Timeframe = job.timeframe.parse()?;
        let optimizer_kind: OptimizerKind = job.optimizer_kind.parse()?;

        let (series, filter_stats) = load_series(
            &self.market,
            &job.symbol,
            &job.exchange,
            timeframe,
            job.lookback_candles,
            &job.filter_config,
            strategy.min_bars(),
        )
        .await?;
        let series = Arc::new(series);

        let backtest_config = BacktestConfig::new(timeframe);
        let mut optimize_config = OptimizeConfig::new(
            optimizer_kind,
            job.n_iterations as usize,
            job.seed as u64,
            backtest_config.clone(),
        );
        optimize_config.min_trades = self.config.min_trades;

        // Cooperative cancel flag, refreshed from the store by a watcher
        let cancel = Arc::new(AtomicBool::new(false));
        let (stop_watcher, watcher) = self.spawn_cancel_watcher(job.job_id, cancel.clone());

        let (publisher, progress_rx) = ProgressPublisher::new(job.job_id);
        let writer = spawn_writer(self.store.clone(), job.job_id, progress_rx);

        let outcome = {
            let strategy = create_strategy(&job.strategy_name)?;
            let series = series.clone();
            let cancel = cancel.clone();
            let optimize_config = optimize_config.clone();
            let compute = tokio::task::spawn_blocking(move || {
                // The publisher lives (and dies) with the compute closure so
                // the progress channel closes exactly when trials stop
                optimize(
                    strategy.as_ref(),
                    &series,
                    &optimize_config,
                    &cancel,
                    Some(&publisher),
                )
            });

            match timeout(Duration::from_secs(self.config.job_timeout_secs), compute).await {
                Err(_elapsed) => return Err(TrainError::SystemError("TIMEOUT".to_string())),
                Ok(Err(join_err)) => return Err(TrainError::system(join_err)),
                Ok(Ok(result)) => result?,
            }
        };

        let _ = stop_watcher.send(());
        let _ = watcher.await;
        if let Err(err) = writer.await {
            warn!(job_id = %job.job_id, error = %err, "progress writer ended abnormally");
        }

        let validation = if job.run_validation {
            Some(self.validate_holdout(strategy.as_ref(), &series, &outcome, &backtest_config)?)
        } else {
            None
        };

        let configuration = TrainedConfiguration {
            config_id: Uuid::new_v4(),
            strategy_name: job.strategy_name.clone(),
            symbol: job.symbol.clone(),
            exchange: job.exchange.clone(),
            timeframe: job.timeframe.clone(),
            regime: job.regime.clone(),
            parameters: outcome.best_params.clone(),
            metrics: TrainedConfiguration::metrics_json(
                &outcome.best_metrics,
                validation.as_ref(),
                Some(&filter_stats),
            ),
            lifecycle_stage: LifecycleStage::Discovery,
            filter_config: job.filter_config.clone(),
            seed: job.seed,
            created_at: Utc::now(),
        };
        self.store.upsert_configuration(&configuration).await?;

        Ok(configuration.config_id)
    }

    /// Re-run the winning parameters on the most recent holdout slice.
    fn validate_holdout(
        &self,
        strategy: &dyn strategy_engine::Strategy,
        series: &BarSeries,
        outcome: &OptimizeOutcome,
        backtest_config: &BacktestConfig,
    ) -> Result<BacktestMetrics, TrainError> {
        let holdout = holdout_slice(series, VALIDATION_HOLDOUT_FRACTION);
        if holdout.len() < strategy.min_bars() {
            warn!("holdout slice shorter than strategy warm-up; skipping validation");
            return Ok(BacktestMetrics::zero_trades());
        }
        let signals = strategy.generate_signals(&holdout, &outcome.best_params, None)?;
        let result = run_backtest(&holdout, &signals, backtest_config, None)?;
        Ok(result.metrics)
    }

    fn spawn_cancel_watcher(
        &self,
        job_id: Uuid,
        cancel: Arc<AtomicBool>,
    ) -> (
        tokio::sync::oneshot::Sender<()>,
        tokio::task::JoinHandle<()>,
    ) {
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        let store = self.store.clone();
        let poll = Duration::from_secs(self.config.cancel_poll_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        match store.is_cancelled(job_id).await {
                            Ok(true) => {
                                info!(job_id = %job_id, "cancel flag observed");
                                cancel.store(true, Ordering::Relaxed);
                                break;
                            }
                            Ok(false) => {}
                            Err(err) => warn!(job_id = %job_id, error = %err, "cancel poll failed"),
                        }
                    }
                }
            }
        });
        (stop_tx, handle)
    }
}

/// The trailing `fraction` of the series as its own immutable view.
fn holdout_slice(series: &BarSeries, fraction: f64) -> BarSeries {
    let n = series.len();
    let start = (n as f64 * (1.0 - fraction)) as usize;
    BarSeries {
        symbol: series.symbol.clone(),
        exchange: series.exchange.clone(),
        timeframe: series.timeframe,
        bars: series.bars[start..].to_vec(),
        atr_14: series.atr_14[start..].to_vec(),
        sma_20: series.sma_20[start..].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use training_core::Bar;

    #[test]
    fn holdout_takes_the_most_recent_quarter() {
        let bars: Vec<Bar> = (0..1000)
            .map(|i| Bar {
                timestamp: i as i64 * 300,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            })
            .collect();
        let series = BarSeries {
            symbol: "BTC/USDT".into(),
            exchange: "binanceus".into(),
            timeframe: Timeframe::M5,
            atr_14: vec![1.0; 1000],
            sma_20: vec![100.0; 1000],
            bars,
        };
        let holdout = holdout_slice(&series, 0.25);
        assert_eq!(holdout.len(), 250);
        assert_eq!(holdout.bars[0].timestamp, 750 * 300);
        assert_eq!(holdout.atr_14.len(), 250);
    }
}
