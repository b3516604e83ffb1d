use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrainError;

/// Sentinel Sharpe for zero-trade results. Large negative (rather than -inf)
/// so optimizers discard it and it survives JSON round-trips.
pub const SHARPE_SENTINEL: f64 = -1.0e9;

/// One OHLCV bar. Timestamps are epoch seconds, uniformly spaced per timeframe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// High-low range of the bar.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute body size (open to close).
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// True when open, high, low and close are all the same price.
    pub fn is_flat(&self) -> bool {
        self.open == self.high && self.high == self.low && self.low == self.close
    }
}

/// An immutable, indicator-enriched bar sequence for one
/// (symbol, exchange, timeframe). The indicator columns are dense and
/// aligned with `bars`; leading rows where an indicator is undefined are
/// dropped during enrichment.
#[derive(Debug, Clone)]
pub struct BarSeries {
    pub symbol: String,
    pub exchange: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
    pub atr_14: Vec<f64>,
    pub sma_20: Vec<f64>,
}

impl BarSeries {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

/// Direction of a signal or trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

/// One entry/exit signal, produced one-per-bar by a strategy.
/// `side == None` means no setup on that bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: i64,
    pub side: Option<Side>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

impl Signal {
    /// A no-setup signal for the given bar.
    pub fn flat(timestamp: i64) -> Self {
        Self {
            timestamp,
            side: None,
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
        }
    }

    pub fn entry(timestamp: i64, side: Side, entry_price: f64, stop_loss: f64, take_profit: f64) -> Self {
        Self {
            timestamp,
            side: Some(side),
            entry_price,
            stop_loss,
            take_profit,
        }
    }

    /// Bracket ordering: SL < entry < TP for longs, mirrored for shorts.
    pub fn bracket_is_valid(&self) -> bool {
        match self.side {
            Some(Side::Long) => self.stop_loss < self.entry_price && self.entry_price < self.take_profit,
            Some(Side::Short) => self.take_profit < self.entry_price && self.entry_price < self.stop_loss,
            None => true,
        }
    }
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    Timeout,
}

/// A completed round-trip trade. `pnl_pct` is net of fees and slippage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub side: Side,
    pub entry_ts: i64,
    pub entry_price: f64,
    pub exit_ts: i64,
    pub exit_price: f64,
    pub qty: f64,
    pub pnl_pct: f64,
    pub exit_reason: ExitReason,
}

/// Aggregate statistics for one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: i32,
    pub win_rate: f64,
    pub net_profit_pct: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    pub max_drawdown_pct: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub sample_size: i32,
}

impl BacktestMetrics {
    /// Well-formed defaults for a run that produced no trades.
    pub fn zero_trades() -> Self {
        Self {
            total_trades: 0,
            win_rate: 0.0,
            net_profit_pct: 0.0,
            sharpe: SHARPE_SENTINEL,
            sortino: SHARPE_SENTINEL,
            calmar: 0.0,
            max_drawdown_pct: 0.0,
            avg_win_pct: 0.0,
            avg_loss_pct: 0.0,
            sample_size: 0,
        }
    }

    /// Look up a metric by objective name.
    pub fn objective_value(&self, objective: &str) -> f64 {
        match objective {
            "sharpe" => self.sharpe,
            "sortino" => self.sortino,
            "calmar" => self.calmar,
            "net_profit_pct" => self.net_profit_pct,
            "win_rate" => self.win_rate,
            _ => self.sharpe,
        }
    }
}

/// Output of one backtest: trade list, metrics and the per-trade equity curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub trades: Vec<Trade>,
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<f64>,
}

/// A concrete parameter assignment. BTreeMap keeps key order deterministic
/// so serialized parameters are byte-identical across runs.
pub type ParameterVector = BTreeMap<String, f64>;

/// Bar timeframe. Crypto markets trade around the clock, so a year is
/// 365 full days of bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    /// Number of bars in a 365-day year, used for Sharpe annualization.
    pub fn bars_per_year(&self) -> f64 {
        (365 * 86_400) as f64 / self.seconds() as f64
    }
}

impl FromStr for Timeframe {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(TrainError::InvalidRequest(format!(
                "unknown timeframe '{other}', expected one of: 1m, 5m, 15m, 1h, 4h, 1d"
            ))),
        }
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Terminal statuses never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl FromStr for JobStatus {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(TrainError::SystemError(format!(
                "unknown job status '{other}' in job store"
            ))),
        }
    }
}

/// Which search algorithm drives the optimizer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Grid,
    Random,
    Bayesian,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizerKind::Grid => "grid",
            OptimizerKind::Random => "random",
            OptimizerKind::Bayesian => "bayesian",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "grid" => Ok(OptimizerKind::Grid),
            "random" => Ok(OptimizerKind::Random),
            "bayesian" => Ok(OptimizerKind::Bayesian),
            other => Err(TrainError::InvalidRequest(format!(
                "unknown optimizer '{other}', expected one of: grid, random, bayesian"
            ))),
        }
    }
}

/// Market regime label a configuration was trained for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Bull,
    Bear,
    Sideways,
    Volatile,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Bull => "bull",
            Regime::Bear => "bear",
            Regime::Sideways => "sideways",
            Regime::Volatile => "volatile",
        }
    }
}

impl FromStr for Regime {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bull" => Ok(Regime::Bull),
            "bear" => Ok(Regime::Bear),
            "sideways" => Ok(Regime::Sideways),
            "volatile" => Ok(Regime::Volatile),
            other => Err(TrainError::InvalidRequest(format!(
                "unknown regime '{other}', expected one of: bull, bear, sideways, volatile"
            ))),
        }
    }
}

/// Externally-assigned track-record stage of a trained configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStage {
    Discovery,
    Paper,
    Validation,
    Mature,
    Decay,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::Discovery => "DISCOVERY",
            LifecycleStage::Paper => "PAPER",
            LifecycleStage::Validation => "VALIDATION",
            LifecycleStage::Mature => "MATURE",
            LifecycleStage::Decay => "DECAY",
        }
    }
}

/// Per-bar progress callback: `(current_bar, total_bars)`.
pub type ProgressFn<'a> = dyn Fn(usize, usize) + Sync + 'a;

/// Callback stride that bounds a scan to ~100 progress invocations.
pub fn progress_stride(total: usize) -> usize {
    (total / 100).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_round_trips() {
        for tf in ["1m", "5m", "15m", "1h", "4h", "1d"] {
            assert_eq!(tf.parse::<Timeframe>().unwrap().as_str(), tf);
        }
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn bars_per_year_matches_timeframe() {
        assert_eq!(Timeframe::D1.bars_per_year(), 365.0);
        assert_eq!(Timeframe::H1.bars_per_year(), 365.0 * 24.0);
        assert_eq!(Timeframe::M5.bars_per_year(), 365.0 * 288.0);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn bracket_validation() {
        let long = Signal::entry(0, Side::Long, 100.0, 95.0, 110.0);
        assert!(long.bracket_is_valid());
        let bad_long = Signal::entry(0, Side::Long, 100.0, 105.0, 110.0);
        assert!(!bad_long.bracket_is_valid());
        let short = Signal::entry(0, Side::Short, 100.0, 105.0, 92.0);
        assert!(short.bracket_is_valid());
    }

    #[test]
    fn progress_stride_caps_callbacks() {
        assert_eq!(progress_stride(50), 1);
        assert_eq!(progress_stride(10_000), 100);
        // ~100 invocations for any n
        let n = 25_000;
        let stride = progress_stride(n);
        assert!(n / stride <= 101);
    }
}
