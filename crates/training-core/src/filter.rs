use serde::{Deserialize, Serialize};

/// Declarative bar-filtering config. Persisted as JSON on the job record so
/// a training run is reproducible against the same data snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Master switch; when false the cleaner passes bars through untouched.
    #[serde(default = "default_true")]
    pub enable_filtering: bool,

    /// Drop bars with volume below this threshold.
    #[serde(default)]
    pub min_volume_threshold: f64,

    /// Drop bars whose (high - low) / close falls below this fraction.
    #[serde(default)]
    pub min_price_movement_pct: f64,

    /// Drop bars where open == high == low == close.
    #[serde(default = "default_true")]
    pub filter_flat_candles: bool,

    /// Keep a flat candle when volume > 1.0 (a legitimate single-price
    /// large trade rather than a dead market).
    #[serde(default = "default_true")]
    pub preserve_high_volume_single_price: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enable_filtering: true,
            min_volume_threshold: 0.0,
            min_price_movement_pct: 0.0,
            filter_flat_candles: true,
            preserve_high_volume_single_price: true,
        }
    }
}

/// What the cleaner did to a series. Invariant:
/// `original_count == filtered_count + removed_zero_volume + removed_micro_movement + removed_flat_candle`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterStats {
    pub original_count: usize,
    pub filtered_count: usize,
    pub removed_zero_volume: usize,
    pub removed_micro_movement: usize,
    pub removed_flat_candle: usize,
    /// Fraction of bars kept, scaled to [0, 100].
    pub quality_score: f64,
}

impl FilterStats {
    pub fn total_removed(&self) -> usize {
        self.removed_zero_volume + self.removed_micro_movement + self.removed_flat_candle
    }
}
