use technical_indicators::trailing_mean;
use training_core::{BarSeries, ParameterVector, ProgressFn, Side, Signal, TrainError};

use crate::space::{ParamRange, ParameterSpace};
use crate::strategy::{report_progress, require, Strategy};

const VOLUME_BASELINE_WINDOW: usize = 20;
const REVERSAL_BODY_ATR: f64 = 0.5;

/// Detects liquidity sweeps: a brief pierce of a well-tested support or
/// resistance level on a volume spike, followed by a reversal close back on
/// the origin side. Long on swept support, short on swept resistance.
pub struct LiquiditySweep;

/// A price level and how often the window respected it.
struct KeyLevel {
    price: f64,
    touches: usize,
}

impl Strategy for LiquiditySweep {
    fn name(&self) -> &'static str {
        "LIQUIDITY_SWEEP"
    }

    fn parameter_space(&self) -> ParameterSpace {
        ParameterSpace::new()
            .add("key_level_lookback", ParamRange::Integer { lo: 50, hi: 200 })
            .add("min_level_touches", ParamRange::Integer { lo: 2, hi: 6 })
            .add(
                "min_distance_from_level",
                ParamRange::Continuous { lo: 0.0005, hi: 0.005 },
            )
            .add("pierce_depth", ParamRange::Continuous { lo: 0.0005, hi: 0.005 })
            .add(
                "volume_spike_threshold",
                ParamRange::Continuous { lo: 1.5, hi: 5.0 },
            )
            .add("reversal_candles", ParamRange::Integer { lo: 1, hi: 5 })
            .add("atr_multiplier_sl", ParamRange::Continuous { lo: 1.0, hi: 3.0 })
            .add("risk_reward_ratio", ParamRange::Continuous { lo: 1.5, hi: 4.0 })
    }

    fn min_bars(&self) -> usize {
        // Largest key_level_lookback the space can draw, plus the pierce
        // bar and at least one bar for the reversal close (the scan skips
        // i + 1 >= n, so lookback_max + 1 bars would never scan at all)
        202
    }

    fn generate_signals(
        &self,
        series: &BarSeries,
        params: &ParameterVector,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<Signal>, TrainError> {
        let lookback = require(params, "key_level_lookback")? as usize;
        let min_touches = require(params, "min_level_touches")? as usize;
        let tolerance = require(params, "min_distance_from_level")?;
        let pierce_depth = require(params, "pierce_depth")?;
        let volume_spike = require(params, "volume_spike_threshold")?;
        let reversal_candles = require(params, "reversal_candles")? as usize;
        let atr_mult = require(params, "atr_multiplier_sl")?;
        let risk_reward = require(params, "risk_reward_ratio")?;

        let n = series.len();
        let bars = &series.bars;
        let mut signals: Vec<Signal> = bars.iter().map(|b| Signal::flat(b.timestamp)).collect();

        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let volume_baseline = trailing_mean(&volumes, VOLUME_BASELINE_WINDOW);

        for i in 0..n {
            report_progress(progress, i, n);

            if i < lookback || i + 1 >= n {
                continue;
            }

            // Volume gate first: the level scan is the expensive step and
            // sweeps without a spike are disqualified anyway.
            let baseline = volume_baseline[i];
            if !baseline.is_finite() || baseline <= 0.0 {
                continue;
            }
            if bars[i].volume < volume_spike * baseline {
                continue;
            }

            // Key levels over the window ending just before the pierce bar,
            // so the pierce itself cannot form the level it sweeps.
            let (supports, resistances) =
                key_levels(series, i - lookback, i, tolerance, min_touches);

            let pierce = &bars[i];

            // Swept support: low dips under the level within the allowed
            // depth, then a bar closes back above it with real body.
            for level in &supports {
                if pierce.low >= level.price {
                    continue;
                }
                let depth = (level.price - pierce.low) / level.price;
                if depth > pierce_depth {
                    continue;
                }
                for j in i + 1..=(i + reversal_candles).min(n - 1) {
                    if bars[j].close > level.price && bars[j].body() >= REVERSAL_BODY_ATR * series.atr_14[j] {
                        place_signal(
                            &mut signals,
                            j,
                            Side::Long,
                            bars[j].close,
                            series.atr_14[j],
                            atr_mult,
                            risk_reward,
                        );
                        break;
                    }
                }
            }

            // Swept resistance, mirrored.
            for level in &resistances {
                if pierce.high <= level.price {
                    continue;
                }
                let depth = (pierce.high - level.price) / level.price;
                if depth > pierce_depth {
                    continue;
                }
                for j in i + 1..=(i + reversal_candles).min(n - 1) {
                    if bars[j].close < level.price && bars[j].body() >= REVERSAL_BODY_ATR * series.atr_14[j] {
                        place_signal(
                            &mut signals,
                            j,
                            Side::Short,
                            bars[j].close,
                            series.atr_14[j],
                            atr_mult,
                            risk_reward,
                        );
                        break;
                    }
                }
            }
        }

        Ok(signals)
    }
}

/// Record a bracketed entry at bar `j` unless one is already there.
fn place_signal(
    signals: &mut [Signal],
    j: usize,
    side: Side,
    entry: f64,
    atr: f64,
    atr_mult: f64,
    risk_reward: f64,
) {
    if signals[j].side.is_some() || atr <= 0.0 {
        return;
    }
    let candidate = match side {
        Side::Long => {
            let stop = entry - atr_mult * atr;
            Signal::entry(signals[j].timestamp, side, entry, stop, entry + risk_reward * (entry - stop))
        }
        Side::Short => {
            let stop = entry + atr_mult * atr;
            Signal::entry(signals[j].timestamp, side, entry, stop, entry - risk_reward * (stop - entry))
        }
    };
    if candidate.bracket_is_valid() {
        signals[j] = candidate;
    }
}

/// Find tested support and resistance levels in `bars[start..end]`.
///
/// Local extrema over a 3-bar symmetric neighborhood seed the candidates;
/// candidates within `tolerance` of each other merge; a level survives when
/// at least `min_touches` bars traded into its band without closing through.
fn key_levels(
    series: &BarSeries,
    start: usize,
    end: usize,
    tolerance: f64,
    min_touches: usize,
) -> (Vec<KeyLevel>, Vec<KeyLevel>) {
    let bars = &series.bars;
    let mut support_candidates = Vec::new();
    let mut resistance_candidates = Vec::new();

    for k in (start + 1)..end.saturating_sub(1) {
        if bars[k].low < bars[k - 1].low && bars[k].low < bars[k + 1].low {
            support_candidates.push(bars[k].low);
        }
        if bars[k].high > bars[k - 1].high && bars[k].high > bars[k + 1].high {
            resistance_candidates.push(bars[k].high);
        }
    }

    let supports = consolidate(support_candidates, tolerance);
    let resistances = consolidate(resistance_candidates, tolerance);

    let count_touches = |level: f64, origin_above: bool| -> usize {
        let band_lo = level * (1.0 - tolerance);
        let band_hi = level * (1.0 + tolerance);
        bars[start..end]
            .iter()
            .filter(|b| {
                let in_band = b.low <= band_hi && b.high >= band_lo;
                let holds = if origin_above {
                    b.close >= level
                } else {
                    b.close <= level
                };
                in_band && holds
            })
            .count()
    };

    let supports = supports
        .into_iter()
        .map(|price| KeyLevel {
            price,
            touches: count_touches(price, true),
        })
        .filter(|l| l.touches >= min_touches)
        .collect();
    let resistances = resistances
        .into_iter()
        .map(|price| KeyLevel {
            price,
            touches: count_touches(price, false),
        })
        .filter(|l| l.touches >= min_touches)
        .collect();

    (supports, resistances)
}

/// Merge candidate prices that sit within `tolerance` of each other into
/// their mean, preserving ascending order.
fn consolidate(mut candidates: Vec<f64>, tolerance: f64) -> Vec<f64> {
    if candidates.is_empty() {
        return candidates;
    }
    candidates.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut merged = Vec::new();
    let mut group: Vec<f64> = vec![candidates[0]];
    for price in candidates.into_iter().skip(1) {
        let anchor = group[0];
        if anchor > 0.0 && (price - anchor) / anchor <= tolerance {
            group.push(price);
        } else {
            merged.push(group.iter().sum::<f64>() / group.len() as f64);
            group = vec![price];
        }
    }
    merged.push(group.iter().sum::<f64>() / group.len() as f64);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use training_core::{Bar, Timeframe};

    /// A series with an obvious support at 100: repeated bounces, then one
    /// bar sweeps below it on huge volume and the next closes back above.
    fn sweep_series() -> BarSeries {
        let mut bars = Vec::new();
        let mut ts = 0i64;
        // 60 bars oscillating over the 100 level, touching it often
        for k in 0..60 {
            let dip = if k % 4 == 0 { 100.0 } else { 100.8 };
            bars.push(Bar {
                timestamp: ts,
                open: 101.0,
                high: 101.5,
                low: dip,
                close: 101.0,
                volume: 10.0,
            });
            ts += 300;
        }
        // The sweep: pierce to 99.8 on 5x volume
        bars.push(Bar {
            timestamp: ts,
            open: 100.5,
            high: 100.6,
            low: 99.8,
            close: 100.0,
            volume: 50.0,
        });
        ts += 300;
        // Reversal: strong close back above the level
        bars.push(Bar {
            timestamp: ts,
            open: 100.0,
            high: 101.6,
            low: 100.0,
            close: 101.5,
            volume: 20.0,
        });
        ts += 300;
        // Tail so the series doesn't end on the reversal bar
        for _ in 0..5 {
            bars.push(Bar {
                timestamp: ts,
                open: 101.0,
                high: 101.5,
                low: 100.8,
                close: 101.2,
                volume: 10.0,
            });
            ts += 300;
        }

        let n = bars.len();
        BarSeries {
            symbol: "BTC/USDT".into(),
            exchange: "binanceus".into(),
            timeframe: Timeframe::M5,
            atr_14: vec![1.0; n],
            sma_20: vec![100.5; n],
            bars,
        }
    }

    fn params() -> ParameterVector {
        let mut p = ParameterVector::new();
        p.insert("key_level_lookback".into(), 50.0);
        p.insert("min_level_touches".into(), 3.0);
        p.insert("min_distance_from_level".into(), 0.002);
        p.insert("pierce_depth".into(), 0.005);
        p.insert("volume_spike_threshold".into(), 2.0);
        p.insert("reversal_candles".into(), 3.0);
        p.insert("atr_multiplier_sl".into(), 1.5);
        p.insert("risk_reward_ratio".into(), 2.0);
        p
    }

    #[test]
    fn emits_one_signal_per_bar() {
        let series = sweep_series();
        let signals = LiquiditySweep
            .generate_signals(&series, &params(), None)
            .unwrap();
        assert_eq!(signals.len(), series.len());
        for (bar, sig) in series.bars.iter().zip(&signals) {
            assert_eq!(bar.timestamp, sig.timestamp);
        }
    }

    #[test]
    fn detects_swept_support() {
        let series = sweep_series();
        let signals = LiquiditySweep
            .generate_signals(&series, &params(), None)
            .unwrap();
        let entries: Vec<&Signal> = signals.iter().filter(|s| s.side.is_some()).collect();
        assert!(!entries.is_empty(), "expected a long on the swept support");
        let long = entries[0];
        assert_eq!(long.side, Some(Side::Long));
        // Signal lands on the reversal bar (index 61), at its close
        assert_eq!(long.timestamp, series.bars[61].timestamp);
        assert_eq!(long.entry_price, series.bars[61].close);
        assert!(long.bracket_is_valid());
        // ATR(1.0) * 1.5 stop, 2:1 reward
        assert!((long.stop_loss - (long.entry_price - 1.5)).abs() < 1e-9);
        assert!((long.take_profit - (long.entry_price + 3.0)).abs() < 1e-9);
    }

    #[test]
    fn quiet_volume_never_triggers() {
        let mut series = sweep_series();
        series.bars[60].volume = 10.0; // sweep bar back to baseline volume
        let signals = LiquiditySweep
            .generate_signals(&series, &params(), None)
            .unwrap();
        assert!(signals.iter().all(|s| s.side.is_none()));
    }

    #[test]
    fn progress_callback_is_throttled() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let series = sweep_series();
        let calls = AtomicUsize::new(0);
        let cb = |_i: usize, _n: usize| {
            calls.fetch_add(1, Ordering::Relaxed);
        };
        LiquiditySweep
            .generate_signals(&series, &params(), Some(&cb))
            .unwrap();
        let n = calls.load(Ordering::Relaxed);
        assert!(n > 0 && n <= 102, "got {n} callbacks");
    }
}
