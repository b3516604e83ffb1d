//! Shared fixtures for optimizer tests: a strongly trending series and a
//! stub strategy whose profit is a known monotone function of its one
//! parameter.

use strategy_engine::{ParamRange, ParameterSpace, Strategy};
use training_core::{
    Bar, BarSeries, ParameterVector, ProgressFn, Side, Signal, Timeframe, TrainError,
};

/// Closes climb 5 per bar; the next bar's high always clears any target
/// within `edge`'s range and the low never reaches the stop.
pub(crate) fn rising_series(n: usize) -> BarSeries {
    let bars: Vec<Bar> = (0..n)
        .map(|i| {
            let close = 100.0 + i as f64 * 5.0;
            Bar {
                timestamp: i as i64 * 300,
                open: close - 2.0,
                high: close + 6.0,
                low: close - 1.0,
                close,
                volume: 10.0,
            }
        })
        .collect();
    BarSeries {
        symbol: "TEST/USDT".to_string(),
        exchange: "testex".to_string(),
        timeframe: Timeframe::M5,
        atr_14: vec![1.0; n],
        sma_20: vec![100.0; n],
        bars,
    }
}

/// Emits a long every third bar with a target `edge` above the close. On
/// `rising_series` every trade wins, so net profit grows with `edge`.
pub(crate) struct StubStrategy {
    /// Cap on emitted entries; 0 means unlimited.
    pub max_signals: usize,
    /// Fail every trial, for error-escalation tests.
    pub always_fail: bool,
}

impl Default for StubStrategy {
    fn default() -> Self {
        Self {
            max_signals: 0,
            always_fail: false,
        }
    }
}

impl Strategy for StubStrategy {
    fn name(&self) -> &'static str {
        "STUB"
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new().add("edge", ParamRange::Continuous { lo: 0.5, hi: 2.0 })
    }

    fn min_bars(&self) -> usize {
        10
    }

    fn generate_signals(
        &self,
        series: &BarSeries,
        params: &ParameterVector,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<Signal>, TrainError> {
        if self.always_fail {
            return Err(TrainError::TrialError("stub failure".to_string()));
        }
        let edge = params
            .get("edge")
            .copied()
            .ok_or_else(|| TrainError::TrialError("missing parameter 'edge'".to_string()))?;

        let n = series.len();
        let mut emitted = 0usize;
        let signals = series
            .bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                if let Some(cb) = progress {
                    if i + 1 == n {
                        cb(n, n);
                    }
                }
                let unlimited = self.max_signals == 0;
                if i % 3 == 0 && i + 1 < n && (unlimited || emitted < self.max_signals) {
                    emitted += 1;
                    Signal::entry(
                        bar.timestamp,
                        Side::Long,
                        bar.close,
                        bar.close - 5.0,
                        bar.close + edge,
                    )
                } else {
                    Signal::flat(bar.timestamp)
                }
            })
            .collect();
        Ok(signals)
    }
}
