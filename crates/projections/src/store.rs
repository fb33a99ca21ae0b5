//! Projection store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{BaseId, ContinentKey, EventCategory, ServerId};
use domain::{
    AlertRecord, ApplyReport, BaseOwnership, PlayerPresence, PopulationSnapshot, ProjectionDelta,
    tally,
};

use crate::Result;

/// Durable current-state and history tables.
///
/// Implementations must be thread-safe (Send + Sync) to allow concurrent
/// handlers to share one store.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    /// Writes a delta in one transaction.
    ///
    /// Ownership and presence rows only replace stored rows that are causally
    /// older. Alert rows are only written if the stored row still sits at the
    /// position the delta was derived from; otherwise nothing is written and
    /// [`ProjectionError::ApplyConflict`](crate::ProjectionError::ApplyConflict)
    /// is returned. An empty delta writes nothing and opens no transaction.
    async fn apply(&self, delta: &ProjectionDelta) -> Result<ApplyReport>;

    /// Loads the stored alert rows for the given continents.
    ///
    /// Continents without a row are simply absent from the result.
    async fn load_alerts(&self, keys: &[ContinentKey]) -> Result<Vec<AlertRecord>>;

    /// Returns who holds a base.
    async fn ownership(&self, server_id: ServerId, base_id: BaseId)
    -> Result<Option<BaseOwnership>>;

    /// Returns every ownership row of a server, ordered by base.
    async fn ownerships(&self, server_id: ServerId) -> Result<Vec<BaseOwnership>>;

    /// Returns each player's latest sighting at or before `as_of`, limited to
    /// sightings newer than `as_of - window`.
    ///
    /// Answered from history, so past instants can be queried too.
    async fn presence_as_of(
        &self,
        server_id: ServerId,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<PlayerPresence>>;

    /// Moves every alert whose grace window closed by `now` to inactive.
    ///
    /// Returns the number of rows changed.
    async fn expire_alerts(&self, now: DateTime<Utc>, grace: Duration) -> Result<u64>;

    /// Returns the number of history rows for a category.
    async fn blip_count(&self, category: EventCategory) -> Result<u64>;
}

/// Extension trait providing read helpers built on [`ProjectionStore`].
#[async_trait]
pub trait ProjectionStoreExt: ProjectionStore {
    /// Counts players per base and per continent at `as_of`.
    async fn population_at(
        &self,
        server_id: ServerId,
        as_of: DateTime<Utc>,
        window: Duration,
    ) -> Result<PopulationSnapshot> {
        let presences = self.presence_as_of(server_id, as_of, window).await?;
        Ok(tally(&presences, as_of, window))
    }
}

// Blanket implementation for all ProjectionStore implementations
impl<T: ProjectionStore + ?Sized> ProjectionStoreExt for T {}
