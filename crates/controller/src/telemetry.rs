//! Tracing and metrics setup.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;
use crate::error::{ControllerError, Result};

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init(),
    }
}

/// Starts the Prometheus scrape listener on `addr`.
pub fn install_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| ControllerError::Metrics(e.to_string()))?;
    describe_metrics();
    tracing::info!(%addr, "serving Prometheus metrics");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "event_store_events_claimed_total",
        "Events claimed from the buffer tables"
    );
    metrics::describe_counter!(
        "event_store_malformed_rows_total",
        "Buffer rows consumed but not decodable"
    );
    metrics::describe_counter!(
        "controller_blips_written_total",
        "History rows written, one per projected event"
    );
    metrics::describe_counter!(
        "controller_malformed_events_total",
        "Events excluded by reference validation"
    );
    metrics::describe_counter!(
        "controller_ineligible_events_total",
        "Events dropped because their server is not tracked"
    );
    metrics::describe_counter!(
        "controller_unknown_category_total",
        "Events of a category without a registered handler"
    );
    metrics::describe_counter!(
        "controller_apply_conflicts_total",
        "Applies retried after a concurrent alert write"
    );
    metrics::describe_counter!(
        "controller_dropped_events_total",
        "Events lost because their batch failed to apply"
    );
    metrics::describe_counter!(
        "controller_store_unavailable_total",
        "Store calls that failed transiently"
    );
    metrics::describe_histogram!(
        "controller_tick_duration_seconds",
        "Wall time of one poll loop tick"
    );
    metrics::describe_histogram!(
        "controller_apply_duration_seconds",
        "Wall time of one category apply, including retries"
    );
    metrics::describe_gauge!(
        "controller_population_players",
        "Players seen within the presence window, per server"
    );
    metrics::describe_gauge!(
        "controller_buffered_events",
        "Events waiting in a buffer table"
    );
}
