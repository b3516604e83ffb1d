use training_core::{Bar, FilterConfig, FilterStats};

/// Filter invalid bars per the declarative config. Single pass, drop-only,
/// order-preserving; the cleaner never reorders or imputes.
///
/// Removal reasons are checked in a fixed order (volume, micro-movement,
/// flat) so a bar failing several rules is counted exactly once and
/// `original_count == filtered_count + sum(removed_*)` always holds.
pub fn clean(bars: Vec<Bar>, config: &FilterConfig) -> (Vec<Bar>, FilterStats) {
    let original_count = bars.len();

    if !config.enable_filtering {
        let stats = FilterStats {
            original_count,
            filtered_count: original_count,
            quality_score: 100.0,
            ..FilterStats::default()
        };
        return (bars, stats);
    }

    let mut kept = Vec::with_capacity(bars.len());
    let mut removed_zero_volume = 0usize;
    let mut removed_micro_movement = 0usize;
    let mut removed_flat_candle = 0usize;

    for bar in bars {
        if bar.volume < config.min_volume_threshold {
            removed_zero_volume += 1;
            continue;
        }

        if config.min_price_movement_pct > 0.0 && bar.close > 0.0 {
            let movement = bar.range() / bar.close;
            if movement < config.min_price_movement_pct {
                removed_micro_movement += 1;
                continue;
            }
        }

        if config.filter_flat_candles && bar.is_flat() {
            // A flat candle on real volume is a legitimate single-price trade
            let preserved = config.preserve_high_volume_single_price && bar.volume > 1.0;
            if !preserved {
                removed_flat_candle += 1;
                continue;
            }
        }

        kept.push(bar);
    }

    let filtered_count = kept.len();
    let quality_score = if original_count > 0 {
        (filtered_count as f64 / original_count as f64 * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let stats = FilterStats {
        original_count,
        filtered_count,
        removed_zero_volume,
        removed_micro_movement,
        removed_flat_candle,
        quality_score,
    };
    (kept, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            timestamp: 0,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn normal_bar() -> Bar {
        bar(100.0, 102.0, 99.0, 101.0, 5.0)
    }

    #[test]
    fn disabled_filtering_passes_through() {
        let bars = vec![bar(100.0, 100.0, 100.0, 100.0, 0.0); 10];
        let config = FilterConfig {
            enable_filtering: false,
            ..FilterConfig::default()
        };
        let (kept, stats) = clean(bars, &config);
        assert_eq!(kept.len(), 10);
        assert_eq!(stats.filtered_count, 10);
        assert_eq!(stats.total_removed(), 0);
        assert_eq!(stats.quality_score, 100.0);
    }

    #[test]
    fn zero_volume_bars_are_dropped() {
        // 100 zero-volume bars among 1000
        let mut bars = Vec::new();
        for i in 0..1000 {
            if i % 10 == 0 {
                bars.push(bar(100.0, 102.0, 99.0, 101.0, 0.0));
            } else {
                bars.push(normal_bar());
            }
        }
        let config = FilterConfig {
            min_volume_threshold: 0.1,
            ..FilterConfig::default()
        };
        let (kept, stats) = clean(bars, &config);
        assert_eq!(kept.len(), 900);
        assert_eq!(stats.filtered_count, 900);
        assert_eq!(stats.removed_zero_volume, 100);
        assert!((stats.quality_score - 90.0).abs() < 1e-10);
    }

    #[test]
    fn micro_movement_bars_are_dropped() {
        let mut bars = vec![normal_bar(); 5];
        // range/close = 0.01/100.05 << 0.1%
        bars.push(bar(100.0, 100.01, 100.0, 100.005, 5.0));
        let config = FilterConfig {
            min_price_movement_pct: 0.001,
            ..FilterConfig::default()
        };
        let (kept, stats) = clean(bars, &config);
        assert_eq!(kept.len(), 5);
        assert_eq!(stats.removed_micro_movement, 1);
    }

    #[test]
    fn flat_candles_dropped_unless_high_volume() {
        let bars = vec![
            normal_bar(),
            bar(100.0, 100.0, 100.0, 100.0, 0.5), // flat, low volume: dropped
            bar(100.0, 100.0, 100.0, 100.0, 3.0), // flat, high volume: preserved
        ];
        let (kept, stats) = clean(bars, &FilterConfig::default());
        assert_eq!(kept.len(), 2);
        assert_eq!(stats.removed_flat_candle, 1);

        let config = FilterConfig {
            preserve_high_volume_single_price: false,
            ..FilterConfig::default()
        };
        let bars = vec![normal_bar(), bar(100.0, 100.0, 100.0, 100.0, 3.0)];
        let (kept, stats) = clean(bars, &config);
        assert_eq!(kept.len(), 1);
        assert_eq!(stats.removed_flat_candle, 1);
    }

    #[test]
    fn stats_are_complete() {
        // Mix of everything; the accounting identity must hold
        let mut bars = Vec::new();
        for i in 0..200 {
            match i % 5 {
                0 => bars.push(bar(100.0, 102.0, 99.0, 101.0, 0.0)),
                1 => bars.push(bar(100.0, 100.0, 100.0, 100.0, 0.2)),
                2 => bars.push(bar(100.0, 100.02, 99.99, 100.0, 5.0)),
                _ => bars.push(normal_bar()),
            }
        }
        let config = FilterConfig {
            min_volume_threshold: 0.1,
            min_price_movement_pct: 0.005,
            ..FilterConfig::default()
        };
        let (kept, stats) = clean(bars, &config);
        assert_eq!(
            stats.original_count,
            stats.filtered_count + stats.total_removed()
        );
        assert_eq!(kept.len(), stats.filtered_count);
    }

    #[test]
    fn empty_input_is_safe() {
        let (kept, stats) = clean(Vec::new(), &FilterConfig::default());
        assert!(kept.is_empty());
        assert_eq!(stats.original_count, 0);
        assert_eq!(stats.quality_score, 0.0);
    }
}
