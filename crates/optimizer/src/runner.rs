use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, warn};

use backtest_engine::run_backtest;
use strategy_engine::Strategy;
use training_core::{
    BacktestMetrics, BarSeries, OptimizerKind, ParameterVector, ProgressFn, TrainError,
};

use crate::{OptimizeConfig, OptimizeOutcome, ProgressSink};

/// Escalate to a job-level failure when at least this share of trials
/// errors out.
const MAX_ERROR_FRACTION: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TrialStatus {
    Valid,
    TooFewTrades,
    Errored,
}

pub(crate) struct TrialOutcome {
    pub params: ParameterVector,
    pub score: f64,
    pub metrics: BacktestMetrics,
    pub status: TrialStatus,
}

/// Leave one core for the OS, the DB and the API tier.
pub(crate) fn worker_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

/// One trial: params → signals → backtest → objective score. A panic or
/// error anywhere inside is contained to this trial.
pub(crate) fn evaluate_trial(
    strategy: &dyn Strategy,
    series: &BarSeries,
    params: ParameterVector,
    config: &OptimizeConfig,
    bar_progress: Option<&ProgressFn<'_>>,
) -> TrialOutcome {
    let run = catch_unwind(AssertUnwindSafe(|| {
        let signals = strategy.generate_signals(series, &params, bar_progress)?;
        run_backtest(series, &signals, &config.backtest, bar_progress)
    }));

    match run {
        Ok(Ok(result)) => {
            let score = result.metrics.objective_value(&config.objective);
            let status = if result.metrics.total_trades < config.min_trades {
                TrialStatus::TooFewTrades
            } else if !score.is_finite() {
                TrialStatus::Errored
            } else {
                TrialStatus::Valid
            };
            TrialOutcome {
                params,
                score,
                metrics: result.metrics,
                status,
            }
        }
        Ok(Err(err)) => {
            debug!(error = %err, "trial failed");
            TrialOutcome {
                params,
                score: f64::NEG_INFINITY,
                metrics: BacktestMetrics::zero_trades(),
                status: TrialStatus::Errored,
            }
        }
        Err(_) => {
            warn!("trial panicked; recording as invalid");
            TrialOutcome {
                params,
                score: f64::NEG_INFINITY,
                metrics: BacktestMetrics::zero_trades(),
                status: TrialStatus::Errored,
            }
        }
    }
}

/// Grid and random search: materialize the full trial list up front, fan
/// the evaluations over the worker pool, then reduce in trial order so the
/// winner is identical run to run regardless of completion order.
pub(crate) fn run_parallel(
    strategy: &dyn Strategy,
    series: &BarSeries,
    config: &OptimizeConfig,
    cancel: &AtomicBool,
    sink: Option<&dyn ProgressSink>,
) -> Result<OptimizeOutcome, TrainError> {
    let space = strategy.parameter_space();
    let vectors: Vec<ParameterVector> = match config.kind {
        OptimizerKind::Grid => space.grid(config.n_iterations),
        OptimizerKind::Random => {
            // Pre-draw every vector sequentially from the seeded RNG; the
            // parallel phase then has no randomness left to race on.
            let mut rng = StdRng::seed_from_u64(config.seed);
            (0..config.n_iterations)
                .map(|_| space.sample(&mut rng))
                .collect()
        }
        OptimizerKind::Bayesian => {
            return Err(TrainError::SystemError(
                "bayesian search is sequential; use run_bayesian".to_string(),
            ))
        }
    };

    if vectors.is_empty() {
        return Err(TrainError::InvalidRequest(
            "parameter space produced no trial vectors".to_string(),
        ));
    }

    let total = vectors.len();
    let completed = AtomicUsize::new(0);
    // Display-only running best; the authoritative winner comes from the
    // ordered reduction below.
    let running_best: Mutex<Option<f64>> = Mutex::new(None);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_threads())
        .build()
        .map_err(TrainError::system)?;

    let outcomes: Vec<Option<TrialOutcome>> = pool.install(|| {
        vectors
            .into_par_iter()
            .map(|params| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }

                let done_before = completed.load(Ordering::Relaxed);
                let bar_cb = sink.map(|s| {
                    move |current: usize, total_bars: usize| {
                        s.on_bar_progress(done_before, total, current, total_bars);
                    }
                });
                let outcome = evaluate_trial(
                    strategy,
                    series,
                    params,
                    config,
                    bar_cb
                        .as_ref()
                        .map(|cb| cb as &ProgressFn<'_>),
                );

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if outcome.status == TrialStatus::Valid {
                    if let Ok(mut best) = running_best.lock() {
                        if best.map_or(true, |b| outcome.score > b) {
                            *best = Some(outcome.score);
                        }
                    }
                }
                if let Some(s) = sink {
                    let best = running_best.lock().ok().and_then(|b| *b);
                    s.on_trial_complete(done, total, best);
                }
                Some(outcome)
            })
            .collect()
    });

    if cancel.load(Ordering::Relaxed) {
        return Err(TrainError::SystemError("optimizer cancelled".to_string()));
    }

    let outcomes: Vec<TrialOutcome> = outcomes.into_iter().flatten().collect();
    select_best(outcomes, total)
}

/// Index-ordered reduction. Ties on score prefer the larger sample; equal
/// samples keep the earlier trial.
pub(crate) fn select_best(
    outcomes: Vec<TrialOutcome>,
    total_trials: usize,
) -> Result<OptimizeOutcome, TrainError> {
    let errored = outcomes
        .iter()
        .filter(|o| o.status == TrialStatus::Errored)
        .count();
    let invalid = outcomes
        .iter()
        .filter(|o| o.status != TrialStatus::Valid)
        .count();

    if total_trials > 0 && errored as f64 >= MAX_ERROR_FRACTION * total_trials as f64 {
        return Err(TrainError::TrialError(format!(
            "{errored} of {total_trials} trials errored; parameter space is unusable for this data"
        )));
    }

    let mut best: Option<&TrialOutcome> = None;
    for outcome in outcomes.iter().filter(|o| o.status == TrialStatus::Valid) {
        let replace = match best {
            None => true,
            Some(current) => {
                outcome.score > current.score
                    || (outcome.score == current.score
                        && outcome.metrics.sample_size > current.metrics.sample_size)
            }
        };
        if replace {
            best = Some(outcome);
        }
    }

    match best {
        Some(winner) => Ok(OptimizeOutcome {
            best_params: winner.params.clone(),
            best_metrics: winner.metrics.clone(),
            best_score: winner.score,
            trials_run: outcomes.len(),
            invalid_trials: invalid,
        }),
        None => Err(TrainError::TrialError(format!(
            "no trial out of {total_trials} met the minimum trade count"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{rising_series, StubStrategy};
    use crate::{optimize, OptimizeConfig};
    use backtest_engine::BacktestConfig;
    use training_core::Timeframe;

    fn config(kind: OptimizerKind, n: usize, seed: u64) -> OptimizeConfig {
        let mut backtest = BacktestConfig::new(Timeframe::M5);
        backtest.exchange_fee_bps = 0.0;
        backtest.slippage_bps = 0.0;
        let mut c = OptimizeConfig::new(kind, n, seed, backtest);
        c.objective = "net_profit_pct".to_string();
        c
    }

    #[test]
    fn grid_finds_the_monotone_optimum() {
        let strategy = StubStrategy::default();
        let series = rising_series(120);
        let cancel = AtomicBool::new(false);

        let outcome = optimize(
            &strategy,
            &series,
            &config(OptimizerKind::Grid, 50, 42),
            &cancel,
            None,
        )
        .unwrap();
        // Net profit rises with edge, so the grid's largest edge wins
        assert_eq!(outcome.best_params["edge"], 2.0);
        assert!(outcome.best_score > 0.0);
    }

    #[test]
    fn grid_is_deterministic() {
        let strategy = StubStrategy::default();
        let series = rising_series(120);
        let run = || {
            let cancel = AtomicBool::new(false);
            optimize(
                &strategy,
                &series,
                &config(OptimizerKind::Grid, 40, 42),
                &cancel,
                None,
            )
            .unwrap()
        };
        let a = run();
        let b = run();
        assert_eq!(a.best_params, b.best_params);
        assert_eq!(a.best_score, b.best_score);
        assert_eq!(a.trials_run, b.trials_run);
    }

    #[test]
    fn random_is_reproducible_per_seed() {
        let strategy = StubStrategy::default();
        let series = rising_series(120);
        let run = |seed| {
            let cancel = AtomicBool::new(false);
            optimize(
                &strategy,
                &series,
                &config(OptimizerKind::Random, 30, seed),
                &cancel,
                None,
            )
            .unwrap()
        };
        let a = run(42);
        let b = run(42);
        assert_eq!(a.best_params, b.best_params);
        assert_eq!(a.best_score, b.best_score);

        let c = run(123);
        assert_ne!(
            a.best_params, c.best_params,
            "different seeds should explore different vectors"
        );
    }

    #[test]
    fn too_few_trades_everywhere_fails_the_run() {
        let strategy = StubStrategy {
            max_signals: 1,
            ..StubStrategy::default()
        };
        let series = rising_series(120);
        let cancel = AtomicBool::new(false);

        let err = optimize(
            &strategy,
            &series,
            &config(OptimizerKind::Random, 10, 42),
            &cancel,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TrainError::TrialError(_)));
    }

    #[test]
    fn widespread_trial_errors_escalate() {
        let strategy = StubStrategy {
            always_fail: true,
            ..StubStrategy::default()
        };
        let series = rising_series(120);
        let cancel = AtomicBool::new(false);

        let err = optimize(
            &strategy,
            &series,
            &config(OptimizerKind::Random, 20, 42),
            &cancel,
            None,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("errored"), "unexpected error: {msg}");
    }

    #[test]
    fn cancellation_stops_the_run() {
        let strategy = StubStrategy::default();
        let series = rising_series(120);
        let cancel = AtomicBool::new(true);

        let err = optimize(
            &strategy,
            &series,
            &config(OptimizerKind::Random, 20, 42),
            &cancel,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn progress_sink_sees_every_trial() {
        use std::sync::atomic::AtomicUsize;

        struct CountingSink {
            trials: AtomicUsize,
            bars: AtomicUsize,
        }
        impl ProgressSink for CountingSink {
            fn on_trial_complete(&self, _c: usize, _t: usize, _b: Option<f64>) {
                self.trials.fetch_add(1, Ordering::Relaxed);
            }
            fn on_bar_progress(&self, _ct: usize, _tt: usize, _c: usize, _t: usize) {
                self.bars.fetch_add(1, Ordering::Relaxed);
            }
        }

        let strategy = StubStrategy::default();
        let series = rising_series(120);
        let cancel = AtomicBool::new(false);
        let sink = CountingSink {
            trials: AtomicUsize::new(0),
            bars: AtomicUsize::new(0),
        };

        optimize(
            &strategy,
            &series,
            &config(OptimizerKind::Random, 15, 42),
            &cancel,
            Some(&sink),
        )
        .unwrap();
        assert_eq!(sink.trials.load(Ordering::Relaxed), 15);
        assert!(sink.bars.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn tie_break_prefers_larger_sample() {
        let mk = |score: f64, sample: i32| TrialOutcome {
            params: ParameterVector::from([("p".to_string(), sample as f64)]),
            score,
            metrics: BacktestMetrics {
                sample_size: sample,
                total_trades: sample,
                ..BacktestMetrics::zero_trades()
            },
            status: TrialStatus::Valid,
        };
        let outcome = select_best(vec![mk(1.0, 5), mk(1.0, 9), mk(0.5, 50)], 3).unwrap();
        assert_eq!(outcome.best_params["p"], 9.0);
    }
}
