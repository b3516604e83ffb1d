//! Indicator math over f64 slices.
//!
//! Every function returns a vector the same length as its input; entries
//! before the warm-up window are NaN. Callers that need a dense series drop
//! the leading NaN rows (see market-data enrichment).

use training_core::Bar;

/// Return val if it is finite, otherwise return default.
#[inline]
pub fn finite_or(val: f64, default: f64) -> f64 {
    if val.is_finite() {
        val
    } else {
        default
    }
}

/// Simple Moving Average, aligned with the input.
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let mut window_sum: f64 = data[..period].iter().sum();
    result[period - 1] = finite_or(window_sum / period as f64, 0.0);
    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        result[i] = finite_or(window_sum / period as f64, 0.0);
    }
    result
}

/// Exponential Moving Average, seeded with the SMA of the first `period`
/// elements, aligned with the input.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period {
        return result;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = finite_or(seed, 0.0);

    for i in period..data.len() {
        let prev = result[i - 1];
        result[i] = finite_or((data[i] - prev) * multiplier + prev, prev);
    }
    result
}

/// Relative Strength Index with Wilder smoothing, aligned with the input.
/// Defined from index `period` onward.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if period == 0 || data.len() < period + 1 {
        return result;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += change.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in period + 1..data.len() {
        let change = data[i] - data[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, change.abs())
        };
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        result[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    result
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    finite_or(100.0 - 100.0 / (1.0 + rs), 50.0)
}

/// Average True Range with Wilder smoothing, aligned with the input bars.
/// Defined from index `period` onward (the first true range needs a
/// previous close).
pub fn atr_wilder(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; bars.len()];
    if period == 0 || bars.len() < period + 1 {
        return result;
    }

    let true_range = |i: usize| -> f64 {
        let prev_close = bars[i - 1].close;
        let hl = bars[i].high - bars[i].low;
        let hc = (bars[i].high - prev_close).abs();
        let lc = (bars[i].low - prev_close).abs();
        hl.max(hc).max(lc)
    };

    let mut atr = 0.0;
    for i in 1..=period {
        atr += true_range(i);
    }
    atr /= period as f64;
    result[period] = finite_or(atr, 0.0);

    for i in period + 1..bars.len() {
        atr = (atr * (period - 1) as f64 + true_range(i)) / period as f64;
        result[i] = finite_or(atr, 0.0);
    }
    result
}

/// Trailing mean over the previous `window` values, NOT including the
/// current one. Used for volume-spike baselines where the spiking bar must
/// not inflate its own reference.
pub fn trailing_mean(data: &[f64], window: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; data.len()];
    if window == 0 || data.len() <= window {
        return result;
    }

    let mut window_sum: f64 = data[..window].iter().sum();
    result[window] = finite_or(window_sum / window as f64, 0.0);
    for i in window + 1..data.len() {
        window_sum += data[i - 1] - data[i - window - 1];
        result[i] = finite_or(window_sum / window as f64, 0.0);
    }
    result
}
