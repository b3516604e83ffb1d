use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::FilterConfig;
use crate::types::{BacktestMetrics, JobStatus, LifecycleStage, ParameterVector};

/// What an external submitter provides. Validated before a job row is
/// written or a token enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub strategy_name: String,
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub regime: String,
    pub optimizer_kind: String,
    #[serde(default = "default_lookback")]
    pub lookback_candles: i64,
    #[serde(default = "default_iterations")]
    pub n_iterations: i64,
    #[serde(default = "default_seed")]
    pub seed: i64,
    #[serde(default)]
    pub filter_config: FilterConfig,
    #[serde(default)]
    pub run_validation: bool,
}

fn default_lookback() -> i64 {
    10_000
}

fn default_iterations() -> i64 {
    200
}

fn default_seed() -> i64 {
    42
}

/// A full job record as held by the job store. Mutated only by the worker
/// that claimed it, except the submitter-set CANCELLED status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub strategy_name: String,
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub regime: String,
    pub optimizer_kind: String,
    pub lookback_candles: i64,
    pub n_iterations: i64,
    pub seed: i64,
    pub filter_config: FilterConfig,
    pub run_validation: bool,
    pub progress_pct: f64,
    pub current_episode: i32,
    pub total_episodes: i32,
    pub current_candle: i32,
    pub total_candles: i32,
    pub best_score: Option<f64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub config_id: Option<Uuid>,
}

/// The output artifact of a successful job: the best-scoring parameter
/// vector and its metrics. Immutable after write; only the lifecycle stage
/// is updated externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedConfiguration {
    pub config_id: Uuid,
    pub strategy_name: String,
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub regime: String,
    pub parameters: ParameterVector,
    pub metrics: serde_json::Value,
    pub lifecycle_stage: LifecycleStage,
    pub filter_config: FilterConfig,
    pub seed: i64,
    pub created_at: DateTime<Utc>,
}

impl TrainedConfiguration {
    /// Build the metrics JSON blob stored on the configuration row.
    /// Validation metrics and data-quality stats ride along when present.
    pub fn metrics_json(
        training: &BacktestMetrics,
        validation: Option<&BacktestMetrics>,
        data_quality: Option<&crate::filter::FilterStats>,
    ) -> serde_json::Value {
        let mut root = serde_json::Map::new();
        root.insert(
            "training".to_string(),
            serde_json::to_value(training).unwrap_or_default(),
        );
        if let Some(v) = validation {
            root.insert(
                "validation".to_string(),
                serde_json::to_value(v).unwrap_or_default(),
            );
        }
        if let Some(q) = data_quality {
            root.insert(
                "data_quality".to_string(),
                serde_json::to_value(q).unwrap_or_default(),
            );
        }
        serde_json::Value::Object(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_apply() {
        let req: JobRequest = serde_json::from_str(
            r#"{
                "strategy_name": "LIQUIDITY_SWEEP",
                "symbol": "BTC/USDT",
                "exchange": "binanceus",
                "timeframe": "5m",
                "regime": "sideways",
                "optimizer_kind": "random"
            }"#,
        )
        .unwrap();
        assert_eq!(req.lookback_candles, 10_000);
        assert_eq!(req.n_iterations, 200);
        assert_eq!(req.seed, 42);
        assert!(req.filter_config.enable_filtering);
        assert!(!req.run_validation);
    }

    #[test]
    fn metrics_json_carries_sections() {
        let training = BacktestMetrics::zero_trades();
        let json = TrainedConfiguration::metrics_json(&training, None, None);
        assert!(json.get("training").is_some());
        assert!(json.get("validation").is_none());

        let validation = BacktestMetrics::zero_trades();
        let json = TrainedConfiguration::metrics_json(&training, Some(&validation), None);
        assert!(json.get("validation").is_some());
    }
}
