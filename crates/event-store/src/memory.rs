use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::EventCategory;
use tokio::sync::RwLock;

use crate::{
    EventStoreError, RawEvent, ReferenceData, Result, event::sort_causally,
    reference::ReferenceStore, store::EventStore,
};

/// In-memory event buffer for testing.
///
/// Behaves like the PostgreSQL implementation: rows get an arrival sequence
/// when pushed and leave the buffer exactly once when claimed.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    buffers: Arc<RwLock<HashMap<EventCategory, Vec<RawEvent>>>>,
    next_sequence: Arc<AtomicI64>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers an event as the producer would, assigning the next arrival
    /// sequence. Returns the event as stored.
    pub async fn push(&self, mut event: RawEvent) -> RawEvent {
        event.sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.buffers
            .write()
            .await
            .entry(event.category())
            .or_default()
            .push(event.clone());
        event
    }

    /// Buffers several events in the given arrival order.
    pub async fn push_all(&self, events: impl IntoIterator<Item = RawEvent>) -> Vec<RawEvent> {
        let mut stored = Vec::new();
        for event in events {
            stored.push(self.push(event).await);
        }
        stored
    }

    /// Returns the total number of buffered events across all categories.
    pub async fn event_count(&self) -> usize {
        self.buffers.read().await.values().map(Vec::len).sum()
    }

    /// Makes every subsequent call fail with `StoreUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(EventStoreError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn claim(
        &self,
        category: EventCategory,
        watermark: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>> {
        self.check_available()?;

        let mut buffers = self.buffers.write().await;
        let Some(buffer) = buffers.get_mut(&category) else {
            return Ok(Vec::new());
        };

        let (mut claimed, kept): (Vec<_>, Vec<_>) = buffer
            .drain(..)
            .partition(|event| event.timestamp < watermark);
        *buffer = kept;

        sort_causally(&mut claimed);
        Ok(claimed)
    }

    async fn buffered(&self, category: EventCategory) -> Result<u64> {
        self.check_available()?;
        Ok(self
            .buffers
            .read()
            .await
            .get(&category)
            .map_or(0, |buffer| buffer.len() as u64))
    }
}

/// In-memory reference tables for testing.
#[derive(Clone, Default)]
pub struct InMemoryReferenceStore {
    data: Arc<RwLock<ReferenceData>>,
    loads: Arc<AtomicI64>,
}

impl InMemoryReferenceStore {
    /// Creates a store serving the given snapshot.
    pub fn new(data: ReferenceData) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
            loads: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Replaces the served snapshot.
    pub async fn replace(&self, data: ReferenceData) {
        *self.data.write().await = data;
    }

    /// Returns how many times the snapshot has been loaded.
    pub fn load_count(&self) -> i64 {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceStore for InMemoryReferenceStore {
    async fn load_reference(&self) -> Result<ReferenceData> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.data.read().await.clone())
    }
}
