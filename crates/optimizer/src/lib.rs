pub mod bayesian;
pub mod runner;

#[cfg(test)]
mod test_util;

use std::sync::atomic::AtomicBool;

use backtest_engine::BacktestConfig;
use strategy_engine::Strategy;
use training_core::{BacktestMetrics, BarSeries, OptimizerKind, ParameterVector, TrainError};

/// How an optimizer run publishes progress without ever blocking the hot
/// path: implementations must throttle internally.
pub trait ProgressSink: Send + Sync {
    /// L2: one call per completed trial.
    fn on_trial_complete(&self, completed: usize, total: usize, best_score: Option<f64>);

    /// L3: bar-scan progress inside an active trial. Heavily throttled by
    /// both caller and implementation.
    fn on_bar_progress(&self, completed_trials: usize, total_trials: usize, current_bar: usize, total_bars: usize);
}

/// Everything an optimizer run needs beyond the strategy and the data.
#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub kind: OptimizerKind,
    pub n_iterations: usize,
    pub seed: u64,
    /// Metric used for best-selection ("sharpe", "sortino", ...).
    pub objective: String,
    /// Trials with fewer trades than this are invalid and never selected.
    pub min_trades: i32,
    pub backtest: BacktestConfig,
}

impl OptimizeConfig {
    pub fn new(kind: OptimizerKind, n_iterations: usize, seed: u64, backtest: BacktestConfig) -> Self {
        Self {
            kind,
            n_iterations,
            seed,
            objective: "sharpe".to_string(),
            min_trades: 3,
            backtest,
        }
    }
}

/// The winning parameter vector and its metrics, plus run accounting.
#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub best_params: ParameterVector,
    pub best_metrics: BacktestMetrics,
    pub best_score: f64,
    pub trials_run: usize,
    pub invalid_trials: usize,
}

/// Search the strategy's parameter space. Grid and random evaluate in
/// parallel; Bayesian is sequential because each acquisition depends on the
/// surrogate fitted to all previous trials. The seed drives every random
/// draw, so identical inputs produce identical trial sequences and an
/// identical winner.
pub fn optimize(
    strategy: &dyn Strategy,
    series: &BarSeries,
    config: &OptimizeConfig,
    cancel: &AtomicBool,
    sink: Option<&dyn ProgressSink>,
) -> Result<OptimizeOutcome, TrainError> {
    if config.n_iterations == 0 {
        return Err(TrainError::InvalidRequest(
            "n_iterations must be at least 1".to_string(),
        ));
    }

    match config.kind {
        OptimizerKind::Grid | OptimizerKind::Random => {
            runner::run_parallel(strategy, series, config, cancel, sink)
        }
        OptimizerKind::Bayesian => bayesian::run_bayesian(strategy, series, config, cancel, sink),
    }
}
