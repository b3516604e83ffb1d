use training_core::{BacktestMetrics, Timeframe, Trade};

/// Aggregate the trade list and equity curve into run metrics. Values are
/// fractions (0.05 = 5%), matching the per-trade `pnl_pct` convention.
pub fn compute_metrics(
    trades: &[Trade],
    equity_curve: &[f64],
    total_bars: usize,
    timeframe: Timeframe,
) -> BacktestMetrics {
    if trades.is_empty() {
        return BacktestMetrics::zero_trades();
    }

    let total = trades.len();
    let returns: Vec<f64> = trades.iter().map(|t| t.pnl_pct).collect();
    let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let losses: Vec<f64> = returns.iter().copied().filter(|r| *r <= 0.0).collect();

    let win_rate = wins.len() as f64 / total as f64;
    let net_profit_pct = equity_curve.last().copied().unwrap_or(1.0) - 1.0;

    let mean = returns.iter().sum::<f64>() / total as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / total as f64;
    let std_dev = variance.sqrt();
    let annualization = timeframe.bars_per_year().sqrt();
    let sharpe = if std_dev > 0.0 {
        mean / std_dev * annualization
    } else {
        0.0
    };

    let downside: Vec<f64> = returns
        .iter()
        .filter(|r| **r < 0.0)
        .map(|r| r.powi(2))
        .collect();
    let downside_dev = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().sum::<f64>() / downside.len() as f64).sqrt()
    };
    let sortino = if downside_dev > 0.0 {
        mean / downside_dev * annualization
    } else {
        0.0
    };

    let max_drawdown_pct = max_drawdown(equity_curve);

    // Annualize over the walked window, then normalize by drawdown
    let annualized_return = if total_bars > 0 {
        let years = total_bars as f64 / timeframe.bars_per_year();
        if years > 0.0 {
            (1.0 + net_profit_pct).powf(1.0 / years) - 1.0
        } else {
            0.0
        }
    } else {
        0.0
    };
    let calmar = if max_drawdown_pct > 0.0 {
        annualized_return / max_drawdown_pct
    } else {
        0.0
    };

    let avg_win_pct = if wins.is_empty() {
        0.0
    } else {
        wins.iter().sum::<f64>() / wins.len() as f64
    };
    let avg_loss_pct = if losses.is_empty() {
        0.0
    } else {
        losses.iter().sum::<f64>() / losses.len() as f64
    };

    BacktestMetrics {
        total_trades: total as i32,
        win_rate,
        net_profit_pct,
        sharpe,
        sortino,
        calmar,
        max_drawdown_pct,
        avg_win_pct,
        avg_loss_pct,
        sample_size: total as i32,
    }
}

/// Largest peak-to-trough decline of the curve, as a fraction of the peak.
fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}
