use technical_indicators::{rsi, trailing_mean};
use training_core::{BarSeries, ParameterVector, ProgressFn, Side, Signal, TrainError};

use crate::space::{ParamRange, ParameterSpace};
use crate::strategy::{report_progress, require, Strategy};

const VOLUME_BASELINE_WINDOW: usize = 20;
const RSI_PERIOD: usize = 14;

/// Detects capitulation: a volume explosion on an extreme-velocity bar that
/// leaves an exhaustion wick while RSI sits at an extreme. Long into panic
/// selling, short into a blowoff top.
pub struct CapitulationReversal;

impl Strategy for CapitulationReversal {
    fn name(&self) -> &'static str {
        "CAPITULATION_REVERSAL"
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .add(
                "volume_explosion_threshold",
                ParamRange::Continuous { lo: 2.0, hi: 6.0 },
            )
            .add("velocity_threshold", ParamRange::Continuous { lo: 1.5, hi: 4.0 })
            .add("wick_ratio", ParamRange::Continuous { lo: 0.3, hi: 0.7 })
            .add("rsi_extreme", ParamRange::Continuous { lo: 15.0, hi: 35.0 })
            .add("atr_multiplier_sl", ParamRange::Continuous { lo: 1.0, hi: 3.0 })
            .add("risk_reward_ratio", ParamRange::Continuous { lo: 1.5, hi: 4.0 })
    }

    fn min_bars(&self) -> usize {
        // Volume baseline (20) and RSI(14) both need to be warm
        VOLUME_BASELINE_WINDOW + RSI_PERIOD + 1
    }

    fn generate_signals(
        &self,
        series: &BarSeries,
        params: &ParameterVector,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<Signal>, TrainError> {
        let volume_explosion = require(params, "volume_explosion_threshold")?;
        let velocity = require(params, "velocity_threshold")?;
        let wick_ratio = require(params, "wick_ratio")?;
        let rsi_extreme = require(params, "rsi_extreme")?;
        let atr_mult = require(params, "atr_multiplier_sl")?;
        let risk_reward = require(params, "risk_reward_ratio")?;

        let n = series.len();
        let bars = &series.bars;
        let mut signals: Vec<Signal> = bars.iter().map(|b| Signal::flat(b.timestamp)).collect();

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volume_baseline = trailing_mean(&volumes, VOLUME_BASELINE_WINDOW);
        let rsi_14 = rsi(&closes, RSI_PERIOD);

        for i in 0..n {
            report_progress(progress, i, n);

            let bar = &bars[i];
            let baseline = volume_baseline[i];
            let atr = series.atr_14[i];
            let strength = rsi_14[i];
            if !baseline.is_finite() || baseline <= 0.0 || !strength.is_finite() || atr <= 0.0 {
                continue;
            }

            // Volume explosion + extreme price velocity
            if bar.volume < volume_explosion * baseline {
                continue;
            }
            let range = bar.range();
            if range < velocity * atr {
                continue;
            }

            let lower_wick = bar.open.min(bar.close) - bar.low;
            let upper_wick = bar.high - bar.open.max(bar.close);

            // Panic selloff: down bar, exhaustion wick underneath, oversold
            if bar.close < bar.open
                && lower_wick >= wick_ratio * range
                && strength <= rsi_extreme
            {
                let entry = bar.close;
                let stop = entry - atr_mult * atr;
                let target = entry + risk_reward * (entry - stop);
                let candidate = Signal::entry(bar.timestamp, Side::Long, entry, stop, target);
                if candidate.bracket_is_valid() {
                    signals[i] = candidate;
                }
                continue;
            }

            // Blowoff top, mirrored
            if bar.close > bar.open
                && upper_wick >= wick_ratio * range
                && strength >= 100.0 - rsi_extreme
            {
                let entry = bar.close;
                let stop = entry + atr_mult * atr;
                let target = entry - risk_reward * (stop - entry);
                let candidate = Signal::entry(bar.timestamp, Side::Short, entry, stop, target);
                if candidate.bracket_is_valid() {
                    signals[i] = candidate;
                }
            }
        }

        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use training_core::{Bar, Timeframe};

    /// A grinding downtrend that ends in a panic flush with a long lower
    /// wick on explosive volume.
    fn capitulation_series() -> BarSeries {
        let mut bars = Vec::new();
        let mut price = 120.0;
        for k in 0..50 {
            // Steady decline keeps RSI pinned low
            let open = price;
            price -= 0.6;
            bars.push(Bar {
                timestamp: k as i64 * 300,
                open,
                high: open + 0.2,
                low: price - 0.2,
                close: price,
                volume: 10.0,
            });
        }
        // The flush: wide down bar, deep lower wick, 6x volume
        let open = price;
        bars.push(Bar {
            timestamp: 50 * 300,
            open,
            high: open + 0.2,
            low: open - 8.0,
            close: open - 2.0,
            volume: 60.0,
        });

        let n = bars.len();
        BarSeries {
            symbol: "ETH/USDT".into(),
            exchange: "binanceus".into(),
            timeframe: Timeframe::M5,
            atr_14: vec![1.2; n],
            sma_20: vec![price; n],
            bars,
        }
    }

    fn params() -> ParameterVector {
        let mut p = ParameterVector::new();
        p.insert("volume_explosion_threshold".into(), 3.0);
        p.insert("velocity_threshold".into(), 2.0);
        p.insert("wick_ratio".into(), 0.5);
        p.insert("rsi_extreme".into(), 30.0);
        p.insert("atr_multiplier_sl".into(), 1.5);
        p.insert("risk_reward_ratio".into(), 2.0);
        p
    }

    #[test]
    fn flags_the_flush_bar_long() {
        let series = capitulation_series();
        let signals = CapitulationReversal
            .generate_signals(&series, &params(), None)
            .unwrap();
        assert_eq!(signals.len(), series.len());

        let last = signals.last().unwrap();
        assert_eq!(last.side, Some(Side::Long));
        assert_eq!(last.entry_price, series.bars.last().unwrap().close);
        assert!(last.bracket_is_valid());
        // Nothing else fires on the quiet decline
        assert_eq!(signals.iter().filter(|s| s.side.is_some()).count(), 1);
    }

    #[test]
    fn ordinary_volume_is_ignored() {
        let mut series = capitulation_series();
        let idx = series.bars.len() - 1;
        series.bars[idx].volume = 12.0;
        let signals = CapitulationReversal
            .generate_signals(&series, &params(), None)
            .unwrap();
        assert!(signals.iter().all(|s| s.side.is_none()));
    }

    #[test]
    fn shallow_wick_is_ignored() {
        let mut series = capitulation_series();
        let idx = series.bars.len() - 1;
        // Same range but the bar closes on its low: no exhaustion wick
        series.bars[idx].close = series.bars[idx].low;
        let signals = CapitulationReversal
            .generate_signals(&series, &params(), None)
            .unwrap();
        assert!(signals.iter().all(|s| s.side.is_none()));
    }
}
