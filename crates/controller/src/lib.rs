//! Map-state controller: claims buffered game events and projects them.
//!
//! The binary wires the PostgreSQL stores to a [`PollLoop`]; the pieces are
//! exposed here so they can be driven against in-memory stores in tests.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod telemetry;

use chrono::TimeDelta;
use domain::{AlertHandler, OwnershipHandler, PopulationHandler};
use projections::{EventRouter, ProjectionStore};

pub use config::{Config, HandlerKind, LogFormat};
pub use error::{ControllerError, Result};
pub use scheduler::{PollLoop, PollSettings, RunningLoop, TickReport};

/// Creates a router with the handlers enabled in `config`.
pub fn build_router<S: ProjectionStore>(config: &Config, store: S) -> Result<EventRouter<S>> {
    let mut router = EventRouter::new(store);
    for kind in &config.enabled_handlers {
        match kind {
            HandlerKind::Ownership => router.register(Box::new(OwnershipHandler::new())),
            HandlerKind::Population => router.register(Box::new(PopulationHandler::new())),
            HandlerKind::Alert => {
                let grace = TimeDelta::from_std(config.alert_grace).map_err(|e| {
                    ControllerError::Config {
                        var: "ALERT_GRACE_SECS",
                        reason: e.to_string(),
                    }
                })?;
                router.register(Box::new(AlertHandler::new(grace)));
            }
        }
        tracing::info!(handler = kind.as_str(), "registered handler");
    }
    Ok(router)
}
