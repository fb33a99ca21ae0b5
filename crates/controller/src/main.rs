//! Controller entry point.

use std::process::ExitCode;

use controller::{Config, PollLoop, PollSettings, build_router, telemetry};
use event_store::{PostgresEventStore, PostgresReferenceStore};
use projections::PostgresProjectionStore;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run(config: Config) -> controller::Result<()> {
    // 1. Install Prometheus metrics exporter
    if let Some(addr) = config.metrics_addr {
        telemetry::install_metrics(addr)?;
    }

    // 2. Connect to the database
    tracing::info!(
        database = %config.redacted_database_url(),
        max_connections = config.db_max_connections,
        "connecting to database"
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.store_timeout)
        .connect(&config.database_url)
        .await?;
    tracing::info!("database connection successful");

    // 3. Wire stores, handlers, and the poll loop
    let events = PostgresEventStore::new(pool.clone()).with_timeout(config.store_timeout);
    let references = PostgresReferenceStore::new(pool.clone()).with_timeout(config.store_timeout);
    let projections = PostgresProjectionStore::new(pool.clone()).with_timeout(config.store_timeout);
    let router = build_router(&config, projections)?;
    let poll_loop = PollLoop::new(events, references, router, PollSettings::from(&config))
        .with_extra_categories(config.extra_categories.iter().copied());

    // 4. Run until a shutdown signal arrives
    let running = poll_loop.spawn();
    shutdown_signal().await;
    if !running.stop().await {
        tracing::warn!("poll loop was not running at shutdown");
    }

    tracing::info!("closing database connection");
    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    telemetry::init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => {
            tracing::info!("controller shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "controller failed");
            ExitCode::FAILURE
        }
    }
}
