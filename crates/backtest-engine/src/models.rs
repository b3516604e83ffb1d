use serde::{Deserialize, Serialize};

use training_core::Timeframe;

/// Execution-model knobs for a backtest run. Fees and slippage are in basis
/// points; position size is the percent of equity risked to the stop on
/// each trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_fee_bps")]
    pub exchange_fee_bps: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: f64,
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: f64,
    /// Force-exit an open position after this many bars.
    #[serde(default = "default_max_holding_periods")]
    pub max_holding_periods: usize,
    /// After a stop-loss exit, block same-side re-entry for this many bars.
    #[serde(default)]
    pub cooldown_bars: usize,
    /// Timeframe of the series, for Sharpe annualization.
    pub timeframe: Timeframe,
}

fn default_fee_bps() -> f64 {
    10.0
}

fn default_slippage_bps() -> f64 {
    5.0
}

fn default_position_size_pct() -> f64 {
    1.0
}

fn default_max_holding_periods() -> usize {
    50
}

impl BacktestConfig {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            exchange_fee_bps: default_fee_bps(),
            slippage_bps: default_slippage_bps(),
            position_size_pct: default_position_size_pct(),
            max_holding_periods: default_max_holding_periods(),
            cooldown_bars: 0,
            timeframe,
        }
    }

    /// Fee rate per leg as a fraction.
    pub fn fee_rate(&self) -> f64 {
        self.exchange_fee_bps / 10_000.0
    }

    /// Slippage per fill as a fraction.
    pub fn slippage_rate(&self) -> f64 {
        self.slippage_bps / 10_000.0
    }
}
