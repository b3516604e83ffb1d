use training_core::{
    progress_stride, BacktestResult, BarSeries, ExitReason, ProgressFn, Side, Signal, Trade,
    TrainError,
};

use crate::metrics::compute_metrics;
use crate::models::BacktestConfig;

/// An open position being tracked during the walk.
struct OpenPosition {
    side: Side,
    entry_bar: usize,
    entry_ts: i64,
    /// Slippage-adjusted fill price; P&L is computed against this.
    entry_exec: f64,
    /// Exit levels stay in signal space; fills compare bar extremes to them.
    stop_loss: f64,
    take_profit: f64,
    qty: f64,
}

/// Simulate one portfolio walk over the series. One position at a time, no
/// pyramiding; exits are checked stop-first (OCO priority: a bar that
/// touches both levels fills the stop, the conservative read).
///
/// Never fails on an empty trade list — a zero-trade run returns a
/// well-formed result with sentinel metrics so the optimizer discards it.
pub fn run_backtest(
    series: &BarSeries,
    signals: &[Signal],
    config: &BacktestConfig,
    progress: Option<&ProgressFn<'_>>,
) -> Result<BacktestResult, TrainError> {
    if signals.len() != series.len() {
        return Err(TrainError::TrialError(format!(
            "signal count {} does not match bar count {}",
            signals.len(),
            series.len()
        )));
    }

    let n = series.len();
    let bars = &series.bars;
    let slip = config.slippage_rate();
    let stride = progress_stride(n);

    let mut trades: Vec<Trade> = Vec::new();
    let mut position: Option<OpenPosition> = None;
    // (blocked side, last bar of the block)
    let mut cooldown: Option<(Side, usize)> = None;

    for i in 0..n {
        if let Some(cb) = progress {
            if i % stride == 0 || i + 1 == n {
                cb(i + 1, n);
            }
        }

        // Exits first: a bar can close the previous entry but never the one
        // it opens itself.
        let exit = match position {
            Some(ref pos) if i > pos.entry_bar => {
                let bar = &bars[i];
                let bars_held = i - pos.entry_bar;
                match pos.side {
                    Side::Long => {
                        if bar.low <= pos.stop_loss {
                            Some((pos.stop_loss, ExitReason::StopLoss))
                        } else if bar.high >= pos.take_profit {
                            Some((pos.take_profit, ExitReason::TakeProfit))
                        } else if bars_held >= config.max_holding_periods {
                            Some((bar.close, ExitReason::Timeout))
                        } else {
                            None
                        }
                    }
                    Side::Short => {
                        if bar.high >= pos.stop_loss {
                            Some((pos.stop_loss, ExitReason::StopLoss))
                        } else if bar.low <= pos.take_profit {
                            Some((pos.take_profit, ExitReason::TakeProfit))
                        } else if bars_held >= config.max_holding_periods {
                            Some((bar.close, ExitReason::Timeout))
                        } else {
                            None
                        }
                    }
                }
            }
            _ => None,
        };

        if let Some((exit_price, reason)) = exit {
            if let Some(pos) = position.take() {
                let trade = close_position(&pos, bars[i].timestamp, exit_price, reason, config);
                if reason == ExitReason::StopLoss && config.cooldown_bars > 0 {
                    cooldown = Some((pos.side, i + config.cooldown_bars));
                }
                trades.push(trade);
            }
        }

        // Entries on a flat book only
        if position.is_none() {
            let signal = &signals[i];
            if let Some(side) = signal.side {
                let blocked = matches!(cooldown, Some((s, until)) if s == side && i <= until);
                if !blocked && signal.bracket_is_valid() && signal.entry_price > 0.0 {
                    // Risk is normalized against the signal-space entry, not
                    // the slippage-adjusted fill: exit comparisons use
                    // signal-space levels, so sizing must too or the
                    // stop/target geometry silently skews.
                    let sl_distance =
                        (signal.entry_price - signal.stop_loss).abs() / signal.entry_price;
                    if sl_distance > 0.0 {
                        let qty = (config.position_size_pct / 100.0) / sl_distance;
                        let entry_exec = match side {
                            Side::Long => signal.entry_price * (1.0 + slip),
                            Side::Short => signal.entry_price * (1.0 - slip),
                        };
                        position = Some(OpenPosition {
                            side,
                            entry_bar: i,
                            entry_ts: bars[i].timestamp,
                            entry_exec,
                            stop_loss: signal.stop_loss,
                            take_profit: signal.take_profit,
                            qty,
                        });
                    }
                }
            }
        }
    }

    // A position still open at the end of the series is abandoned: every
    // recorded trade carries a real exit reason.
    let equity_curve = equity_curve(&trades);
    let metrics = compute_metrics(&trades, &equity_curve, n, config.timeframe);

    Ok(BacktestResult {
        trades,
        metrics,
        equity_curve,
    })
}

/// Finalize a trade: adverse exit slippage, both fee legs, qty-scaled P&L.
fn close_position(
    pos: &OpenPosition,
    exit_ts: i64,
    exit_price: f64,
    reason: ExitReason,
    config: &BacktestConfig,
) -> Trade {
    let slip = config.slippage_rate();
    let (exit_exec, price_return) = match pos.side {
        Side::Long => {
            let exec = exit_price * (1.0 - slip);
            (exec, exec / pos.entry_exec - 1.0)
        }
        Side::Short => {
            let exec = exit_price * (1.0 + slip);
            (exec, pos.entry_exec / exec - 1.0)
        }
    };
    let pnl_pct = pos.qty * (price_return - 2.0 * config.fee_rate());

    Trade {
        side: pos.side,
        entry_ts: pos.entry_ts,
        entry_price: pos.entry_exec,
        exit_ts,
        exit_price: exit_exec,
        qty: pos.qty,
        pnl_pct,
        exit_reason: reason,
    }
}

/// Compound the per-trade returns into an equity curve anchored at 1.0.
fn equity_curve(trades: &[Trade]) -> Vec<f64> {
    let mut curve = Vec::with_capacity(trades.len() + 1);
    let mut equity = 1.0;
    curve.push(equity);
    for trade in trades {
        equity *= 1.0 + trade.pnl_pct;
        curve.push(equity);
    }
    curve
}
