//! training-ctl: operational CLI for the training core.
//!
//! Usage:
//!   training-ctl submit --strategy LIQUIDITY_SWEEP --symbol BTC/USDT \
//!       --exchange binanceus --timeframe 5m --regime sideways \
//!       --optimizer random [--lookback 10000] [--iterations 200] \
//!       [--seed 42] [--validate]
//!   training-ctl status <job_id>
//!   training-ctl cancel <job_id>
//!   training-ctl sweep
//!   training-ctl depth

use uuid::Uuid;

use job_runtime::cancel::{cancel_job, orphan_sweep};
use job_runtime::{get_job, submit_job, JobStore, TrainingQueue, WorkerConfig};
use training_core::{FilterConfig, JobRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "job_runtime=info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    let config = WorkerConfig::from_env()?;
    let store = JobStore::connect(&config.database_url).await?;
    store.init_schema().await?;
    let mut queue = TrainingQueue::connect(
        &config.redis_url,
        &config.queue_name,
        config.failed_retention,
    )
    .await?;

    match command {
        "submit" => {
            let request = JobRequest {
                strategy_name: flag(&args, "--strategy").unwrap_or_default(),
                symbol: flag(&args, "--symbol").unwrap_or_default(),
                exchange: flag(&args, "--exchange").unwrap_or_default(),
                timeframe: flag(&args, "--timeframe").unwrap_or_else(|| "5m".into()),
                regime: flag(&args, "--regime").unwrap_or_else(|| "sideways".into()),
                optimizer_kind: flag(&args, "--optimizer").unwrap_or_else(|| "random".into()),
                lookback_candles: flag_parse(&args, "--lookback", 10_000),
                n_iterations: flag_parse(&args, "--iterations", 200),
                seed: flag_parse(&args, "--seed", 42),
                filter_config: FilterConfig::default(),
                run_validation: args.iter().any(|a| a == "--validate"),
            };
            let job_id = submit_job(&store, &mut queue, request).await?;
            println!("{job_id}");
        }
        "status" => {
            let job_id = parse_job_id(&args)?;
            let job = get_job(&store, job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        "cancel" => {
            let job_id = parse_job_id(&args)?;
            let cancelled = cancel_job(&store, &mut queue, job_id).await?;
            println!(
                "{}",
                if cancelled {
                    "cancelled"
                } else {
                    "already terminal"
                }
            );
        }
        "sweep" => {
            let swept = orphan_sweep(&store).await?;
            println!("swept {} orphaned jobs", swept.len());
        }
        "depth" => {
            println!(
                "pending={} processing={}",
                queue.pending_depth().await?,
                queue.processing_depth().await?
            );
            for token in queue.pending_tokens().await? {
                println!("pending {token}");
            }
            for token in queue.processing_tokens().await? {
                println!("processing {token}");
            }
        }
        _ => {
            eprintln!("commands: submit, status <job_id>, cancel <job_id>, sweep, depth");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn flag(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn flag_parse<T: std::str::FromStr>(args: &[String], name: &str, default: T) -> T {
    flag(args, name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_job_id(args: &[String]) -> anyhow::Result<Uuid> {
    let raw = args
        .get(2)
        .ok_or_else(|| anyhow::anyhow!("expected a job id"))?;
    Ok(raw.parse::<Uuid>()?)
}
