use technical_indicators::trailing_mean;
use training_core::{BarSeries, ParameterVector, ProgressFn, Side, Signal, TrainError};

use crate::space::{ParamRange, ParameterSpace};
use crate::strategy::{report_progress, require, Strategy};

const VOLUME_BASELINE_WINDOW: usize = 20;

/// Detects Wyckoff springs: a tight accumulation range, a breakdown below
/// the range low on weak volume, and a fast recovery back inside the range
/// on strong volume. Long only — the short side of a spring is a different
/// animal (an upthrust) and is not traded here.
pub struct FailedBreakdown;

impl Strategy for FailedBreakdown {
    fn name(&self) -> &'static str {
        "FAILED_BREAKDOWN"
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .add("range_window", ParamRange::Integer { lo: 20, hi: 60 })
            .add("max_range_pct", ParamRange::Continuous { lo: 0.02, hi: 0.08 })
            .add(
                "breakdown_volume_ratio",
                ParamRange::Continuous { lo: 0.3, hi: 0.8 },
            )
            .add(
                "recovery_volume_ratio",
                ParamRange::Continuous { lo: 1.2, hi: 3.0 },
            )
            .add("recovery_candles", ParamRange::Integer { lo: 1, hi: 5 })
            .add("atr_multiplier_sl", ParamRange::Continuous { lo: 1.0, hi: 3.0 })
            .add("risk_reward_ratio", ParamRange::Continuous { lo: 1.5, hi: 4.0 })
    }

    fn min_bars(&self) -> usize {
        // Largest range_window the space can draw, plus the breakdown bar
        // and at least one bar for the recovery close (the scan skips
        // i + 1 >= n, so range_window_max + 1 bars would never scan)
        62
    }

    fn generate_signals(
        &self,
        series: &BarSeries,
        params: &ParameterVector,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<Signal>, TrainError> {
        let range_window = require(params, "range_window")? as usize;
        let max_range_pct = require(params, "max_range_pct")?;
        let breakdown_ratio = require(params, "breakdown_volume_ratio")?;
        let recovery_ratio = require(params, "recovery_volume_ratio")?;
        let recovery_candles = require(params, "recovery_candles")? as usize;
        let atr_mult = require(params, "atr_multiplier_sl")?;
        let risk_reward = require(params, "risk_reward_ratio")?;

        let n = series.len();
        let bars = &series.bars;
        let mut signals: Vec<Signal> = bars.iter().map(|b| Signal::flat(b.timestamp)).collect();

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let volume_baseline = trailing_mean(&volumes, VOLUME_BASELINE_WINDOW);

        for i in 0..n {
            report_progress(progress, i, n);

            if i < range_window || i + 1 >= n {
                continue;
            }
            let baseline = volume_baseline[i];
            if !baseline.is_finite() || baseline <= 0.0 {
                continue;
            }

            // The trading range ends just before the breakdown bar
            let window = &bars[i - range_window..i];
            let band_high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let band_low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let band_mid = (band_high + band_low) / 2.0;
            if band_mid <= 0.0 || (band_high - band_low) / band_mid > max_range_pct {
                continue;
            }

            // Weak-volume breakdown below the band
            let breakdown = &bars[i];
            if breakdown.close >= band_low || breakdown.volume > breakdown_ratio * baseline {
                continue;
            }

            // Recovery back inside the band on strong volume
            for j in i + 1..=(i + recovery_candles).min(n - 1) {
                let rec = &bars[j];
                let rec_baseline = volume_baseline[j];
                if !rec_baseline.is_finite() || rec_baseline <= 0.0 {
                    continue;
                }
                if rec.close > band_low && rec.volume >= recovery_ratio * rec_baseline {
                    let atr = series.atr_14[j];
                    if atr <= 0.0 || signals[j].side.is_some() {
                        break;
                    }
                    let entry = rec.close;
                    let stop = entry - atr_mult * atr;
                    let target = entry + risk_reward * (entry - stop);
                    let candidate = Signal::entry(rec.timestamp, Side::Long, entry, stop, target);
                    if candidate.bracket_is_valid() {
                        signals[j] = candidate;
                    }
                    break;
                }
            }
        }

        Ok(signals)
    }
}
