//! Domain layer for the map-state controller.
//!
//! This crate holds the pure part of the pipeline:
//! - the [`Handler`] trait and the [`ProjectionDelta`] it produces
//! - ownership, population, and alert handlers
//! - the continent alert state machine
//! - validation of events against reference data
//!
//! Nothing here performs I/O.

pub mod alert;
pub mod delta;
pub mod error;
pub mod handler;
pub mod ownership;
pub mod population;
pub mod state;
pub mod validation;

pub use alert::{AlertHandler, AlertRecord, AlertState, Transition};
pub use delta::{AlertChange, ApplyReport, ProjectionDelta};
pub use error::{DomainError, Result};
pub use handler::{Handler, PriorKeys, PriorState};
pub use ownership::OwnershipHandler;
pub use population::{
    PopulationHandler, PopulationSnapshot, default_presence_window, presence_cutoff, tally,
};
pub use state::{BaseOwnership, PlayerPresence};
pub use validation::{Screened, screen, validate};
