use sqlx::PgPool;

use training_core::{Bar, TrainError};

/// Read-only access to the `market_data` time-series relation.
pub struct MarketDataStore {
    pool: PgPool,
}

/// Internal row type for sqlx deserialization.
#[derive(sqlx::FromRow)]
struct BarRow {
    timestamp: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl MarketDataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch the most recent `lookback` bars for the tuple key, ascending by
    /// timestamp. Fetches DESC + LIMIT then reverses, so a store whose
    /// newest bar trails wall-clock still yields its latest window.
    pub async fn fetch_recent(
        &self,
        symbol: &str,
        exchange: &str,
        timeframe: &str,
        lookback: i64,
    ) -> Result<Vec<Bar>, TrainError> {
        let rows = sqlx::query_as::<_, BarRow>(
            "SELECT timestamp, open::float8 AS open, high::float8 AS high,
                    low::float8 AS low, close::float8 AS close,
                    volume::float8 AS volume
             FROM market_data
             WHERE exchange = $1 AND symbol = $2 AND timeframe = $3
             ORDER BY timestamp DESC
             LIMIT $4",
        )
        .bind(exchange)
        .bind(symbol)
        .bind(timeframe)
        .bind(lookback)
        .fetch_all(&self.pool)
        .await
        .map_err(TrainError::system)?;

        if rows.is_empty() {
            return Err(TrainError::InsufficientData(format!(
                "no market data for {symbol} on {exchange} at {timeframe}"
            )));
        }

        let mut bars: Vec<Bar> = rows
            .into_iter()
            .map(|r| Bar {
                timestamp: r.timestamp,
                open: r.open,
                high: r.high,
                low: r.low,
                close: r.close,
                volume: r.volume,
            })
            .collect();
        bars.reverse();
        Ok(bars)
    }
}
