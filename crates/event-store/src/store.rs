use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventCategory;

use crate::{RawEvent, Result};

/// Core trait for event buffer implementations.
///
/// The buffer is written by an external producer. This core only ever
/// removes rows from it, through [`EventStore::claim`]. All implementations
/// must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically removes and returns every buffered event of `category`
    /// whose timestamp is strictly older than `watermark`.
    ///
    /// Events are returned in causal order (timestamp, then arrival
    /// sequence). A claimed row is never returned again, even to a
    /// concurrent caller with an overlapping watermark. Returns an empty
    /// vector when nothing is eligible.
    ///
    /// Rows that cannot be decoded into a typed event are consumed, logged,
    /// and left out of the result.
    async fn claim(&self, category: EventCategory, watermark: DateTime<Utc>)
    -> Result<Vec<RawEvent>>;

    /// Returns the number of events currently waiting in the buffer of
    /// `category`.
    async fn buffered(&self, category: EventCategory) -> Result<u64>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Claims every buffered event of `category`, up to the current time.
    async fn claim_now(&self, category: EventCategory) -> Result<Vec<RawEvent>> {
        self.claim(category, Utc::now()).await
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}
