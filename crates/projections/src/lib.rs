//! Durable projections and the router that feeds them.
//!
//! This crate provides the write side of the map state:
//! - [`ProjectionStore`] trait for transactional delta application
//! - PostgreSQL and in-memory implementations
//! - [`EventRouter`] for splitting claimed batches across handlers

pub mod error;
pub mod memory;
pub mod postgres;
pub mod router;
pub mod store;

pub use error::{ProjectionError, Result};
pub use memory::InMemoryProjectionStore;
pub use postgres::PostgresProjectionStore;
pub use router::{CategoryReport, DEFAULT_MAX_ATTEMPTS, EventRouter, RouteReport};
pub use store::{ProjectionStore, ProjectionStoreExt};
