//! objsync daemon
//!
//! Run with: objsync-daemon --root /data --bucket my-bucket

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use objsync::error::Result;
use objsync::store::S3Store;
use objsync::{EngineState, RetryPolicy, SyncConfig, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "objsync-daemon")]
#[command(about = "Mirror a directory tree into an object-storage bucket")]
#[command(version)]
struct Args {
    /// Directory tree to watch (recursive)
    #[arg(long, env = "OBJSYNC_ROOT", default_value = "/data")]
    root: String,

    /// Target bucket name
    #[arg(long, env = "OBJSYNC_BUCKET")]
    bucket: String,

    /// Key prefix inside the bucket
    #[arg(long, env = "OBJSYNC_KEY_PREFIX", default_value = "")]
    key_prefix: String,

    /// Quiet period before a changed file is uploaded, in milliseconds
    #[arg(long, env = "OBJSYNC_DEBOUNCE_MS", default_value = "1000")]
    debounce_ms: u64,

    /// Upload worker count (0 = number of cores, minimum 2)
    #[arg(long, env = "OBJSYNC_WORKERS", default_value = "0")]
    workers: usize,

    /// Maximum upload attempts per file
    #[arg(long, env = "OBJSYNC_MAX_ATTEMPTS", default_value = "5")]
    max_attempts: u32,

    /// Per-attempt upload timeout in seconds
    #[arg(long, env = "OBJSYNC_ATTEMPT_TIMEOUT", default_value = "60")]
    attempt_timeout_secs: u64,

    /// Upload queue capacity (distinct paths)
    #[arg(long, env = "OBJSYNC_QUEUE_CAPACITY", default_value = "1024")]
    queue_capacity: usize,

    /// Seconds between health log lines (0 = disabled)
    #[arg(long, env = "OBJSYNC_HEALTH_INTERVAL", default_value = "60")]
    health_interval_secs: u64,

    /// Shutdown grace period in seconds
    #[arg(long, env = "OBJSYNC_GRACE", default_value = "30")]
    grace_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Expand ~ in path
    let root = shellexpand::tilde(&args.root).to_string();

    let mut config = SyncConfig::new(root, args.bucket);
    config.key_prefix = args.key_prefix;
    config.debounce_ms = args.debounce_ms;
    config.workers = args.workers;
    config.attempt_timeout_secs = args.attempt_timeout_secs;
    config.queue_capacity = args.queue_capacity;
    config.retry = RetryPolicy {
        max_attempts: args.max_attempts,
        ..RetryPolicy::default()
    };

    tracing::info!("starting objsync v{}", objsync::VERSION);
    tracing::info!("watching directory: {}", config.root.display());
    tracing::info!("target bucket: {}", config.bucket);

    let store = Arc::new(S3Store::connect(config.bucket.clone()).await?);
    let engine = SyncEngine::start(config, store)?;

    let log_health = args.health_interval_secs > 0;
    let tick_secs = if log_health {
        args.health_interval_secs
    } else {
        5 // still poll for an unexpected drain
    };
    let mut ticker = tokio::time::interval(Duration::from_secs(tick_secs));
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping objsync");
                break;
            }
            _ = ticker.tick() => {
                let health = engine.health();
                if log_health {
                    tracing::info!(
                        state = ?health.state,
                        queue_depth = health.queue_depth,
                        active_workers = health.active_workers,
                        uploaded = health.uploaded,
                        failed = health.failed,
                        "health"
                    );
                }
                if health.state == EngineState::Draining {
                    tracing::error!("engine is draining without a stop request; shutting down");
                    break;
                }
            }
        }
    }

    engine.stop(Duration::from_secs(args.grace_secs)).await;
    Ok(())
}
