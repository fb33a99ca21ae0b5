//! Read-only reference data: servers and bases.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use common::{BaseId, ContinentId, ServerId};
use serde::{Deserialize, Serialize};

use crate::Result;

/// A game server known to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedServer {
    pub id: ServerId,
    pub name: String,
    pub region: String,
    /// Only events from servers with tracking enabled are processed.
    pub tracking_enabled: bool,
}

/// A capturable base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base {
    pub id: BaseId,
    pub name: String,
    pub continent_id: ContinentId,
    pub base_type: String,
    pub map_pos_x: f64,
    pub map_pos_y: f64,
}

/// A snapshot of the reference tables.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    servers: HashMap<ServerId, TrackedServer>,
    bases: HashMap<BaseId, Base>,
    continents: BTreeSet<ContinentId>,
}

impl ReferenceData {
    /// Creates a snapshot from the given rows.
    pub fn new(
        servers: impl IntoIterator<Item = TrackedServer>,
        bases: impl IntoIterator<Item = Base>,
    ) -> Self {
        let servers: HashMap<_, _> = servers.into_iter().map(|s| (s.id, s)).collect();
        let bases: HashMap<_, _> = bases.into_iter().map(|b| (b.id, b)).collect();
        let continents = bases.values().map(|b| b.continent_id).collect();
        Self {
            servers,
            bases,
            continents,
        }
    }

    /// Looks up a server.
    pub fn server(&self, id: ServerId) -> Option<&TrackedServer> {
        self.servers.get(&id)
    }

    /// Looks up a base.
    pub fn base(&self, id: BaseId) -> Option<&Base> {
        self.bases.get(&id)
    }

    /// Returns true if events from this server should be processed.
    pub fn is_tracked(&self, id: ServerId) -> bool {
        self.server(id).is_some_and(|s| s.tracking_enabled)
    }

    /// Returns true if at least one base lies on this continent.
    pub fn has_continent(&self, id: ContinentId) -> bool {
        self.continents.contains(&id)
    }

    /// Returns the IDs of all servers with tracking enabled, in ascending order.
    pub fn tracked_servers(&self) -> Vec<ServerId> {
        let mut ids: Vec<_> = self
            .servers
            .values()
            .filter(|s| s.tracking_enabled)
            .map(|s| s.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn base_count(&self) -> usize {
        self.bases.len()
    }
}

/// Access to the reference tables.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Loads a full snapshot of servers and bases.
    async fn load_reference(&self) -> Result<ReferenceData>;
}
