//! # housemetrics
//!
//! Polls home devices and cloud services on a schedule, accepts webhook
//! pushes, and writes everything as metric points to InfluxDB (or the log).
//!
//! ## Core Responsibilities:
//! - **Configuration:** flags, environment and `.env`, via `Config::load`.
//! - **Pollers:** one scheduled task per source, all sharing one HTTP client,
//!   one sink and one cancellation token.
//! - **Webhooks:** an axum listener for Rachio, Rainforest and PurpleAir.
//! - **Lifecycle:** on SIGINT/SIGTERM the token is cancelled, the listener
//!   drains, every task is joined, and the process exits cleanly.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use lib_housemetrics::configs::{Config, StoreKind};
use lib_housemetrics::core::{spawn_all, ScheduledTask, TaskFactory};
use lib_housemetrics::endpoints::router;
use lib_housemetrics::ingestors::{AmbientWeather, Awair, Flume, Particle, PurpleAir};
use lib_housemetrics::loggers::setup_logging;
use lib_housemetrics::retrieve::HttpClient;
use lib_housemetrics::store::{InfluxStore, LogStore, MetricSink};

/// # Main Entry Point
///
/// ## Execution Flow:
/// 1.  **Configuration**: `.env`, environment, flags.
/// 2.  **Logging**: console plus optional rolling JSON file.
/// 3.  **Sink**: build and validate; an invalid sink stops startup.
/// 4.  **Tasks**: one scheduled task per source.
/// 5.  **Listener**: bind the webhook address before anything runs.
/// 6.  **Run**: spawn the tasks and serve until a shutdown signal.
/// 7.  **Shutdown**: cancel, drain, join, exit 0.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- Phase 1: Configuration ---
    let config = Config::load()?;

    // --- Phase 2: Logging ---
    // The guard flushes the file writer on drop, so it lives until main returns.
    let _log_guard = setup_logging(&config.logging()).context("failed to set up logging")?;

    // --- Phase 3: Sink ---
    let client = HttpClient::new()?;
    let sink: Arc<dyn MetricSink> = match config.store {
        StoreKind::Influxdb => Arc::new(InfluxStore::new(client.clone(), config.influx())),
        StoreKind::Log => Arc::new(LogStore::new()),
    };
    sink.init().context("trying to init an invalid store")?;

    // --- Phase 4: Scheduled Tasks ---
    let factory = TaskFactory::new(client, Arc::clone(&sink)).with_cooldown(config.cooldown);
    let tasks = build_tasks(&factory, &config);

    // --- Phase 5: Webhook Listener ---
    let token = CancellationToken::new();
    let app = router(factory.sink(), &config.webhooks(), token.clone());
    let listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;

    // --- Phase 6: Run ---
    let mut pollers = spawn_all(tasks, &token, &sink);

    info!(addr = %config.http_addr, "starting listener");
    let server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(token.clone().cancelled_owned())
            .into_future(),
    );

    shutdown_signal().await;

    // --- Phase 7: Shutdown ---
    info!("shutting down");
    token.cancel();

    info!("waiting for pollers to stop");
    while let Some(joined) = pollers.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "poller task failed");
        }
    }

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "listener failed"),
        Err(e) => error!(error = %e, "listener task failed"),
    }

    info!("stopped");
    Ok(())
}

/// One task per source, in a fixed order. Disabled sources are built too;
/// they log "disabled" and return as soon as they run.
fn build_tasks(factory: &TaskFactory, config: &Config) -> Vec<ScheduledTask> {
    vec![
        factory.make_looper("awair", config.awair.schedule(), |ctx| {
            Awair::new(ctx, config.awair.settings())
        }),
        factory.make_looper("ambientweather", config.ambient_weather.schedule(), |ctx| {
            AmbientWeather::new(ctx, config.ambient_weather.settings())
        }),
        factory.make_looper("flume", config.flume.schedule(), |ctx| {
            Flume::new(ctx, config.flume.settings())
        }),
        factory.make_looper("purpleair", config.purpleair.schedule(), |ctx| {
            PurpleAir::new(ctx, config.purpleair.settings())
        }),
        factory.make_looper("particle", config.particle.schedule(), |ctx| {
            Particle::new(ctx, config.particle.settings())
        }),
    ]
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed is
/// logged and never fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    // On non-UNIX systems, `terminate` is a future that never completes.
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
