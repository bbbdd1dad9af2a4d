use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tweetlens_core::TweetlensConfig;
use tweetlens_scheduler::{
    jobs::builtin_registry, IntervalScheduler, JobFactory, JobResponse, PendingJobs,
    ResponseCorrelator, Trigger,
};
use tweetlens_sink::SqliteSink;

mod spark;

use spark::SparkChannel;

/// Inbound responses buffered between the socket reader and the correlator.
const RESPONSE_BUFFER: usize = 256;

/// Dispatches tweet analytics jobs to Spark and stores their results.
#[derive(Debug, Parser)]
#[command(name = "tweetlens-gateway", version)]
struct Args {
    /// Config file (default: $TWEETLENS_CONFIG, then ~/.tweetlens/tweetlens.toml).
    #[arg(long)]
    config: Option<String>,

    /// Start triggers immediately instead of at the next full hour.
    #[arg(long)]
    start_now: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tweetlens_gateway=info,tweetlens_scheduler=info,tweetlens_sink=info".into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config > TWEETLENS_CONFIG env > ~/.tweetlens/tweetlens.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("TWEETLENS_CONFIG").ok());
    let config = TweetlensConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        TweetlensConfig::default()
    });

    let registry = Arc::new(builtin_registry()?);
    info!(job_types = registry.len(), "job types registered");

    let triggers = config
        .scheduler
        .triggers
        .iter()
        .map(Trigger::from_config)
        .collect::<Result<Vec<_>, _>>()?;

    if let Err(e) = config.database.ensure_parent_dir() {
        warn!(path = %config.database.path, error = %e, "could not create database directory");
    }
    let sink = Arc::new(SqliteSink::open(&config.database.path, &registry)?);

    // Spark socket reader → correlator
    let (response_tx, response_rx) = mpsc::channel::<JobResponse>(RESPONSE_BUFFER);
    let reader_cancel = CancellationToken::new();
    let channel = Arc::new(SparkChannel::new(
        &config.spark.addr,
        response_tx,
        reader_cancel.clone(),
    ));
    if let Err(e) = channel.connect(config.spark.connect_attempts).await {
        // not fatal: the first submit retries the connection
        warn!(error = %e, "spark unavailable at start-up");
    }

    let pending = Arc::new(PendingJobs::new());
    let scheduler = IntervalScheduler::new(
        JobFactory::new(Arc::clone(&registry)),
        Arc::clone(&pending),
        channel,
    );
    let correlator = ResponseCorrelator::new(Arc::clone(&registry), pending, sink);
    scheduler.track(correlator.run(response_rx, scheduler.cancel_token().child_token()));

    if args.start_now || !config.scheduler.align_to_hour {
        scheduler.start_after(Duration::ZERO, triggers)?;
    } else {
        scheduler.start_aligned(
            chrono::Duration::seconds(config.scheduler.grace_secs as i64),
            triggers,
        )?;
    }

    if config.scheduler.orphan_ttl_secs > 0 {
        scheduler.spawn_orphan_sweep(
            chrono::Duration::seconds(config.scheduler.orphan_ttl_secs as i64),
            Duration::from_secs(config.scheduler.sweep_interval_secs.max(1)),
        );
    }

    info!(spark = %config.spark.addr, "tweetlens gateway running");
    tokio::signal::ctrl_c().await?;

    scheduler.shutdown().await;
    reader_cancel.cancel();
    Ok(())
}
