//! Typed access to the raw event buffer and the reference tables.
//!
//! The buffer is the hand-off point between the external event producer and
//! this controller. Events leave it exactly once, through a destructive
//! [`EventStore::claim`].

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod reference;
pub mod store;

pub use common::{EventCategory, Faction};
pub use error::{DeadlineExceeded, EventStoreError, Result, is_transient, with_deadline};
pub use event::{
    AlertPhase, BaseControl, CausalOrder, ContinentAlert, EventPayload, PlayerBlip, RawEvent,
    RawEventBuilder, sort_causally,
};
pub use memory::{InMemoryEventStore, InMemoryReferenceStore};
pub use postgres::{PostgresEventStore, PostgresReferenceStore};
pub use reference::{Base, ReferenceData, ReferenceStore, TrackedServer};
pub use store::{EventStore, EventStoreExt};
