use tracing::info;

use technical_indicators::{atr_wilder, sma};
use training_core::{Bar, BarSeries, FilterConfig, FilterStats, Timeframe, TrainError};

use crate::cleaner::clean;
use crate::store::MarketDataStore;

/// A job fails fast when filtering eats more than half the requested window.
pub const MIN_POST_FILTER_FRACTION: f64 = 0.5;

const ATR_PERIOD: usize = 14;
const SMA_PERIOD: usize = 20;

/// Enrich cleaned bars with ATR(14) and SMA(20) and assemble the immutable
/// series. Leading bars where either indicator is undefined are dropped so
/// the indicator columns are dense and aligned.
pub fn enrich(
    bars: Vec<Bar>,
    symbol: &str,
    exchange: &str,
    timeframe: Timeframe,
) -> Result<BarSeries, TrainError> {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let atr = atr_wilder(&bars, ATR_PERIOD);
    let sma_20 = sma(&closes, SMA_PERIOD);

    let start = atr
        .iter()
        .zip(sma_20.iter())
        .position(|(a, s)| a.is_finite() && s.is_finite())
        .ok_or_else(|| {
            TrainError::InsufficientData(format!(
                "{} bars is too short to warm up ATR({ATR_PERIOD}) and SMA({SMA_PERIOD})",
                bars.len()
            ))
        })?;

    Ok(BarSeries {
        symbol: symbol.to_string(),
        exchange: exchange.to_string(),
        timeframe,
        bars: bars[start..].to_vec(),
        atr_14: atr[start..].to_vec(),
        sma_20: sma_20[start..].to_vec(),
    })
}

/// Full C1 read path: fetch the most recent window, clean it, enrich it,
/// and enforce the minimum-length contracts.
pub async fn load_series(
    store: &MarketDataStore,
    symbol: &str,
    exchange: &str,
    timeframe: Timeframe,
    lookback: i64,
    filter_config: &FilterConfig,
    strategy_min_bars: usize,
) -> Result<(BarSeries, FilterStats), TrainError> {
    let raw = store
        .fetch_recent(symbol, exchange, timeframe.as_str(), lookback)
        .await?;

    let (cleaned, stats) = clean(raw, filter_config);
    info!(
        symbol,
        exchange,
        timeframe = timeframe.as_str(),
        original = stats.original_count,
        kept = stats.filtered_count,
        quality_score = stats.quality_score,
        "cleaned market data"
    );

    let floor = (lookback as f64 * MIN_POST_FILTER_FRACTION) as usize;
    if cleaned.len() < floor {
        return Err(TrainError::InsufficientData(format!(
            "only {} of {} requested bars survived filtering (minimum {})",
            cleaned.len(),
            lookback,
            floor
        )));
    }

    let series = enrich(cleaned, symbol, exchange, timeframe)?;
    if series.len() < strategy_min_bars {
        return Err(TrainError::InsufficientData(format!(
            "{} enriched bars is below the strategy minimum of {}",
            series.len(),
            strategy_min_bars
        )));
    }

    Ok((series, stats))
}
