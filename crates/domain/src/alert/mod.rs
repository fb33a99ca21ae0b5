//! Continent alert projection.

mod handler;
mod state;

pub use handler::AlertHandler;
pub use state::{AlertRecord, AlertState, Transition};
