//! Leaderboard service binary.
//!
//! Wires the stores, the durable-write worker, the reset scheduler, and
//! the HTTP surface together, then serves until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`leaderboard.yaml`, first CLI argument, or
//!    `LEADERBOARD_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` (with backoff) and run migrations
//! 4. Connect to `Dragonfly` (with backoff)
//! 5. Start the durable writer; parked writes are resumed before new work
//! 6. Build the engine and start the reset scheduler
//! 7. Serve HTTP until a shutdown signal
//! 8. Drain the writer and close the pools

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use leaderboard_api::AppState;
use leaderboard_core::{
    AlertLog, Deadlines, DurableWriter, Leaderboard, ResetScheduler, RetryPolicy, ServiceConfig,
};
use leaderboard_db::{DragonflyPool, PostgresConfig, PostgresPool};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::ServiceError;

/// Default configuration file name.
const DEFAULT_CONFIG_PATH: &str = "leaderboard.yaml";

/// How long the writer may drain after the HTTP server stops.
const WRITER_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, a store connection, or the HTTP
/// listener fails.
#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Load configuration.
    let config_path = config_path();
    let config = ServiceConfig::from_file(&config_path)?;
    let time_zone = config.scheduler.time_zone()?;

    // 2. Initialize structured logging.
    init_tracing(&config);
    info!(
        config_path = %config_path.display(),
        bind = config.server.bind_addr(),
        lanes = config.writer.lanes,
        scheduler = config.scheduler.enabled,
        "leaderboard-server starting"
    );

    let startup_retry = RetryPolicy::new(5, 500, 5_000, 10);

    // 3. Durable store.
    let pg_config = PostgresConfig::new(&config.infrastructure.postgres_url)
        .with_max_connections(config.infrastructure.postgres_max_connections)
        .with_min_connections(config.infrastructure.postgres_min_connections)
        .with_acquire_timeout(Duration::from_millis(config.infrastructure.postgres_acquire_timeout_ms));
    let postgres = startup_retry
        .retry_async(|_| PostgresPool::connect(&pg_config))
        .await?;
    postgres.run_migrations().await?;

    // 4. Fast store.
    let dragonfly_url = config.infrastructure.dragonfly_url.clone();
    let pool_size = config.infrastructure.dragonfly_pool_size;
    let dragonfly = startup_retry
        .retry_async(|_| DragonflyPool::connect_with_size(&dragonfly_url, pool_size))
        .await?;

    let durable = Arc::new(postgres.clone());
    let fast = Arc::new(dragonfly.clone());

    // 5. Durable writer. It keeps its own token so it can drain after the
    //    HTTP server has stopped.
    let alerts = AlertLog::new();
    let writer_cancel = CancellationToken::new();
    let writer = DurableWriter::start(durable.clone(), alerts.clone(), &config.writer, writer_cancel).await?;
    let parked = writer.dead_letters().await?;
    if parked > 0 {
        tracing::warn!(parked, "Dead letters remain after start-up replay");
    }

    // 6. Engine and scheduler.
    let engine = Arc::new(Leaderboard::new(
        fast,
        durable,
        Arc::clone(&writer),
        Deadlines::from(&config.timeouts),
        config.rebuild,
    ));

    let shutdown = CancellationToken::new();
    let scheduler_handle = if config.scheduler.enabled {
        let scheduler = ResetScheduler::new(
            Arc::clone(&engine),
            alerts.clone(),
            time_zone,
            Duration::from_secs(config.scheduler.interval_secs.max(1)),
        );
        Some(scheduler.spawn(shutdown.child_token()))
    } else {
        info!("Reset scheduler disabled");
        None
    };

    // 7. HTTP server.
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Could not listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    let state = Arc::new(AppState::new(engine, alerts, shutdown.clone()));
    let served = leaderboard_api::start_server(&config.server, state, shutdown.clone()).await;
    shutdown.cancel();

    // 8. Drain and close.
    if let Some(handle) = scheduler_handle
        && let Err(e) = handle.await
    {
        tracing::warn!(error = %e, "Reset scheduler task ended abnormally");
    }
    writer.shutdown(WRITER_DRAIN_GRACE).await;
    postgres.close().await;
    if let Err(e) = dragonfly.close().await {
        tracing::warn!(error = %e, "Dragonfly pool did not close cleanly");
    }

    served?;
    info!("leaderboard-server stopped");
    Ok(())
}

/// Configuration path from the first CLI argument, `LEADERBOARD_CONFIG`,
/// or the default file name.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("LEADERBOARD_CONFIG").ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
fn init_tracing(config: &ServiceConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}
